//! Record event dispatcher
//!
//! Takes one firehose event at a time and routes it to the indexer for its
//! collection:
//!
//! ```text
//!   event ─▶ collection gate ─┬─ delete ─▶ compensating lookup ─▶ handle_delete
//!                             └─ create/update ─▶ validate ─▶ [create: trust] ─▶ handle_create/update
//! ```
//!
//! The whole per-event routine runs inside a single guard. Errors and panics
//! from any branch are logged with the event's identifiers and the event is
//! dropped, so one bad event never stops the stream. The dispatcher keeps no
//! state between events.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, info, trace, warn};

use super::event::{RecordAction, RecordEvent};
use super::indexer::{CreateRecord, DeleteRecord, IndexerSet, UpdateRecord};
use super::validator::{RecordValidator, ValidationResult};
use crate::identity::{AccountAge, IdentityStatus, IdentityVerifier, InactiveReason};
use crate::logging::IngestStats;
use crate::store::RecordStore;
use crate::types::{IndexerError, Result, SupportedCollection, TrustStatus};

/// Why an event was dropped without reaching an indexer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Create or update arrived without a record body
    MissingPayload,
    /// Record failed validation
    Invalid(String),
    /// Author's identity is tombstoned or unknown to the directory
    InactiveAuthor(InactiveReason),
}

/// What happened to one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handed to the collection's indexer
    Indexed {
        collection: SupportedCollection,
        action: RecordAction,
    },
    /// Collection is not one this service indexes
    Ignored,
    /// Rejected before indexing
    Dropped(DropReason),
    /// Handling raised an error or panicked
    Failed(String),
}

pub struct RecordDispatcher {
    validator: RecordValidator,
    indexers: IndexerSet,
    store: Arc<dyn RecordStore>,
    account_age: Arc<dyn AccountAge>,
    verifier: Option<IdentityVerifier>,
    stats: Arc<IngestStats>,
}

impl RecordDispatcher {
    pub fn new(indexers: IndexerSet, store: Arc<dyn RecordStore>, account_age: Arc<dyn AccountAge>) -> Self {
        Self {
            validator: RecordValidator::new(),
            indexers,
            store,
            account_age,
            verifier: None,
            stats: Arc::new(IngestStats::new()),
        }
    }

    /// Drop creates and updates from tombstoned or unknown authors
    pub fn with_identity_verifier(mut self, verifier: IdentityVerifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_stats(mut self, stats: Arc<IngestStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }

    /// Handle one event to completion. Never fails.
    pub async fn handle_event(&self, event: &RecordEvent) -> DispatchOutcome {
        let outcome = match AssertUnwindSafe(self.process(event)).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!(
                    event_id = event.id,
                    collection = %event.collection,
                    action = event.action.as_str(),
                    did = %event.did,
                    rkey = %event.rkey,
                    error = %e,
                    "Failed to process record event"
                );
                DispatchOutcome::Failed(e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    event_id = event.id,
                    collection = %event.collection,
                    action = event.action.as_str(),
                    did = %event.did,
                    rkey = %event.rkey,
                    panic = %message,
                    "Record event handler panicked"
                );
                DispatchOutcome::Failed(format!("panic: {message}"))
            }
        };

        match &outcome {
            DispatchOutcome::Indexed { .. } => self.stats.incr_indexed(),
            DispatchOutcome::Ignored => self.stats.incr_ignored(),
            DispatchOutcome::Dropped(_) => self.stats.incr_dropped(),
            DispatchOutcome::Failed(_) => self.stats.incr_failed(),
        }
        outcome
    }

    async fn process(&self, event: &RecordEvent) -> Result<DispatchOutcome> {
        let Some(record_uri) = event.uri() else {
            trace!(collection = %event.collection, "Ignoring unsupported collection");
            return Ok(DispatchOutcome::Ignored);
        };
        let collection = record_uri.collection;

        let indexer = self
            .indexers
            .get(collection)
            .ok_or_else(|| IndexerError::Config(format!("no indexer registered for {collection}")))?;
        let uri = record_uri.to_string();

        match event.action {
            RecordAction::Delete => {
                let reference_uri = self.compensating_reference(collection, &uri).await?;
                indexer
                    .handle_delete(DeleteRecord {
                        uri,
                        rkey: event.rkey.clone(),
                        did: event.did.clone(),
                        reference_uri,
                    })
                    .await?;
            }
            RecordAction::Create | RecordAction::Update => {
                let Some(payload) = event.record.as_ref() else {
                    warn!(
                        event_id = event.id,
                        uri = %uri,
                        action = event.action.as_str(),
                        "Record event without payload, dropping"
                    );
                    return Ok(DispatchOutcome::Dropped(DropReason::MissingPayload));
                };

                let record = match self.validator.validate(&event.collection, payload) {
                    ValidationResult::Success { data } => data,
                    ValidationResult::Failure { error } => {
                        debug!(event_id = event.id, uri = %uri, error = %error, "Invalid record, dropping");
                        return Ok(DispatchOutcome::Dropped(DropReason::Invalid(error)));
                    }
                };

                if let Some(reason) = self.inactive_author(&event.did).await {
                    info!(uri = %uri, did = %event.did, reason = %reason, "Author inactive, dropping");
                    return Ok(DispatchOutcome::Dropped(DropReason::InactiveAuthor(reason)));
                }

                if event.action == RecordAction::Create {
                    let trust_status = self.classify_author(&event.did).await;
                    indexer
                        .handle_create(CreateRecord {
                            uri,
                            rkey: event.rkey.clone(),
                            did: event.did.clone(),
                            cid: event.cid.clone(),
                            record,
                            live: event.live,
                            trust_status,
                        })
                        .await?;
                } else {
                    indexer
                        .handle_update(UpdateRecord {
                            uri,
                            rkey: event.rkey.clone(),
                            did: event.did.clone(),
                            cid: event.cid.clone(),
                            record,
                            live: event.live,
                        })
                        .await?;
                }
            }
        }

        Ok(DispatchOutcome::Indexed {
            collection,
            action: event.action,
        })
    }

    /// Recover what a delete event leaves out: the parent a reply counted
    /// toward, or the subject a reaction counted toward.
    ///
    /// Not transactional with the delete that follows. Concurrent deliveries
    /// of the same delete can both find the row.
    async fn compensating_reference(&self, collection: SupportedCollection, uri: &str) -> Result<Option<String>> {
        let reference = match collection {
            SupportedCollection::TopicPost => return Ok(None),
            SupportedCollection::TopicReply => self.store.find_reply_parent(uri).await?,
            SupportedCollection::Reaction => self.store.find_reaction_subject(uri).await?,
        };
        if reference.is_none() {
            debug!(uri = %uri, "Deleted record not in local store, skipping count adjustment");
        }
        Ok(reference)
    }

    /// Definitive inactive verdict for an author, if a verifier is attached.
    ///
    /// `resolution failed` does not block indexing.
    async fn inactive_author(&self, did: &str) -> Option<InactiveReason> {
        let verifier = self.verifier.as_ref()?;
        match verifier.verify(did).await {
            IdentityStatus::Active => None,
            IdentityStatus::Inactive {
                reason: InactiveReason::ResolutionFailed,
            } => {
                debug!(did = %did, "Author verification unavailable, indexing anyway");
                None
            }
            IdentityStatus::Inactive { reason } => Some(reason),
        }
    }

    /// Trust classification for a create. Fails open to trusted.
    async fn classify_author(&self, did: &str) -> TrustStatus {
        match self.resolve_trust(did).await {
            Ok(status) => status,
            Err(e) => {
                warn!(did = %did, error = %e, "Trust classification failed, defaulting to trusted");
                TrustStatus::Trusted
            }
        }
    }

    async fn resolve_trust(&self, did: &str) -> Result<TrustStatus> {
        self.store.upsert_identity(did).await?;
        let created_at = self.account_age.resolve_creation_date(did).await?;
        Ok(self.account_age.determine_trust_status(created_at))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{DirectoryStatus, IdentityDirectory};
    use crate::ingest::indexer::Indexer;
    use crate::store::{MemoryKeyValueCache, MemoryRecordStore, StoredRecord};
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Create(CreateRecord),
        Update(UpdateRecord),
        Delete(DeleteRecord),
    }

    #[derive(Default)]
    struct RecordingIndexer {
        calls: Mutex<Vec<Call>>,
        fail: bool,
        panic: bool,
    }

    impl RecordingIndexer {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn push(&self, call: Call) -> Result<()> {
            if self.panic {
                panic!("indexer exploded");
            }
            if self.fail {
                return Err(IndexerError::Database("write conflict".into()));
            }
            self.calls.lock().unwrap().push(call);
            Ok(())
        }
    }

    #[async_trait]
    impl Indexer for RecordingIndexer {
        async fn handle_create(&self, op: CreateRecord) -> Result<()> {
            self.push(Call::Create(op))
        }

        async fn handle_update(&self, op: UpdateRecord) -> Result<()> {
            self.push(Call::Update(op))
        }

        async fn handle_delete(&self, op: DeleteRecord) -> Result<()> {
            self.push(Call::Delete(op))
        }
    }

    enum Age {
        Created(DateTime<Utc>),
        Unknown,
        Broken,
    }

    struct FixedAge(Age);

    #[async_trait]
    impl AccountAge for FixedAge {
        async fn resolve_creation_date(&self, _did: &str) -> Result<Option<DateTime<Utc>>> {
            match &self.0 {
                Age::Created(at) => Ok(Some(*at)),
                Age::Unknown => Ok(None),
                Age::Broken => Err(IndexerError::Directory("audit log unavailable".into())),
            }
        }
    }

    struct FixedDirectory(Option<DirectoryStatus>);

    #[async_trait]
    impl IdentityDirectory for FixedDirectory {
        async fn resolve(&self, _did: &str) -> Result<DirectoryStatus> {
            self.0
                .ok_or_else(|| IndexerError::Directory("unreachable".into()))
        }
    }

    const DID: &str = "did:plc:ewvi7nxzyoun6zhxrhs64oiz";

    fn reply_record() -> serde_json::Value {
        json!({
            "content": "Agreed",
            "root": {"uri": "at://did:plc:op/forum.barazo.topic.post/3kroot", "cid": "bafyroot"},
            "parent": {"uri": "at://did:plc:op/forum.barazo.topic.post/3kroot", "cid": "bafyroot"},
            "community": "did:plc:community",
            "createdAt": "2025-03-01T12:00:00Z"
        })
    }

    fn event(collection: &str, action: RecordAction, record: Option<serde_json::Value>) -> RecordEvent {
        RecordEvent {
            id: 1,
            collection: collection.to_string(),
            action,
            did: DID.to_string(),
            rkey: "3kreply".to_string(),
            record,
            cid: Some("bafyreply".to_string()),
            live: true,
        }
    }

    fn dispatcher(indexer: Arc<RecordingIndexer>, store: Arc<MemoryRecordStore>, age: Age) -> RecordDispatcher {
        RecordDispatcher::new(IndexerSet::uniform(indexer), store, Arc::new(FixedAge(age)))
    }

    #[tokio::test]
    async fn test_unsupported_collection_ignored() {
        let indexer = Arc::new(RecordingIndexer::default());
        let d = dispatcher(indexer.clone(), Arc::new(MemoryRecordStore::new()), Age::Unknown);

        let outcome = d
            .handle_event(&event("app.bsky.feed.post", RecordAction::Create, Some(json!({}))))
            .await;
        assert_eq!(outcome, DispatchOutcome::Ignored);
        assert!(indexer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_established_account_is_trusted() {
        let indexer = Arc::new(RecordingIndexer::default());
        let store = Arc::new(MemoryRecordStore::new());
        let d = dispatcher(indexer.clone(), store.clone(), Age::Created(Utc::now() - Duration::days(90)));

        let outcome = d
            .handle_event(&event("forum.barazo.topic.reply", RecordAction::Create, Some(reply_record())))
            .await;
        assert_eq!(
            outcome,
            DispatchOutcome::Indexed {
                collection: SupportedCollection::TopicReply,
                action: RecordAction::Create
            }
        );

        match &indexer.calls()[..] {
            [Call::Create(op)] => {
                assert_eq!(op.uri, format!("at://{DID}/forum.barazo.topic.reply/3kreply"));
                assert_eq!(op.trust_status, TrustStatus::Trusted);
                assert_eq!(op.cid.as_deref(), Some("bafyreply"));
                assert!(op.live);
            }
            other => panic!("unexpected calls: {other:?}"),
        }
        // Identity was upserted on the way
        assert!(store.identity(DID).is_some());
    }

    #[tokio::test]
    async fn test_create_new_account_is_flagged() {
        let indexer = Arc::new(RecordingIndexer::default());
        let d = dispatcher(
            indexer.clone(),
            Arc::new(MemoryRecordStore::new()),
            Age::Created(Utc::now() - Duration::minutes(10)),
        );

        d.handle_event(&event("forum.barazo.topic.reply", RecordAction::Create, Some(reply_record())))
            .await;
        match &indexer.calls()[..] {
            [Call::Create(op)] => assert_eq!(op.trust_status, TrustStatus::New),
            other => panic!("unexpected calls: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_trust_classification_fails_open() {
        let indexer = Arc::new(RecordingIndexer::default());
        let d = dispatcher(indexer.clone(), Arc::new(MemoryRecordStore::new()), Age::Broken);

        d.handle_event(&event("forum.barazo.topic.reply", RecordAction::Create, Some(reply_record())))
            .await;
        match &indexer.calls()[..] {
            [Call::Create(op)] => assert_eq!(op.trust_status, TrustStatus::Trusted),
            other => panic!("unexpected calls: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_update_skips_trust_classification() {
        let indexer = Arc::new(RecordingIndexer::default());
        let store = Arc::new(MemoryRecordStore::new());
        let d = dispatcher(indexer.clone(), store.clone(), Age::Broken);

        d.handle_event(&event("forum.barazo.topic.reply", RecordAction::Update, Some(reply_record())))
            .await;
        assert!(matches!(&indexer.calls()[..], [Call::Update(_)]));
        assert!(store.identity(DID).is_none());
    }

    #[tokio::test]
    async fn test_missing_payload_dropped() {
        let indexer = Arc::new(RecordingIndexer::default());
        let d = dispatcher(indexer.clone(), Arc::new(MemoryRecordStore::new()), Age::Unknown);

        let outcome = d
            .handle_event(&event("forum.barazo.topic.reply", RecordAction::Create, None))
            .await;
        assert_eq!(outcome, DispatchOutcome::Dropped(DropReason::MissingPayload));
        assert!(indexer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_record_never_reaches_indexer() {
        let indexer = Arc::new(RecordingIndexer::default());
        let d = dispatcher(indexer.clone(), Arc::new(MemoryRecordStore::new()), Age::Unknown);

        let outcome = d
            .handle_event(&event(
                "forum.barazo.topic.reply",
                RecordAction::Create,
                Some(json!({"content": "no refs"})),
            ))
            .await;
        assert!(matches!(outcome, DispatchOutcome::Dropped(DropReason::Invalid(_))));
        assert!(indexer.calls().is_empty());
        assert_eq!(d.stats().snapshot().dropped, 1);
    }

    #[tokio::test]
    async fn test_delete_of_absent_record_passes_empty_reference() {
        let indexer = Arc::new(RecordingIndexer::default());
        let d = dispatcher(indexer.clone(), Arc::new(MemoryRecordStore::new()), Age::Unknown);

        let outcome = d
            .handle_event(&event("forum.barazo.topic.reply", RecordAction::Delete, None))
            .await;
        assert!(matches!(outcome, DispatchOutcome::Indexed { .. }));
        match &indexer.calls()[..] {
            [Call::Delete(op)] => assert_eq!(op.reference_uri, None),
            other => panic!("unexpected calls: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_recovers_reaction_subject() {
        let indexer = Arc::new(RecordingIndexer::default());
        let store = Arc::new(MemoryRecordStore::new());
        let uri = format!("at://{DID}/forum.barazo.interaction.reaction/3kreply");
        store
            .upsert_record(StoredRecord {
                uri: uri.clone(),
                did: DID.to_string(),
                collection: "forum.barazo.interaction.reaction".to_string(),
                rkey: "3kreply".to_string(),
                cid: None,
                record: json!({}),
                reference_uri: Some("at://did:plc:op/forum.barazo.topic.post/3kroot".to_string()),
                created_at: Utc::now(),
                indexed_at: Utc::now(),
                trust_status: None,
                reply_count: 0,
                reaction_count: 0,
            })
            .await
            .unwrap();

        let d = dispatcher(indexer.clone(), store, Age::Unknown);
        d.handle_event(&event("forum.barazo.interaction.reaction", RecordAction::Delete, None))
            .await;

        match &indexer.calls()[..] {
            [Call::Delete(op)] => {
                assert_eq!(op.uri, uri);
                assert_eq!(
                    op.reference_uri.as_deref(),
                    Some("at://did:plc:op/forum.barazo.topic.post/3kroot")
                );
            }
            other => panic!("unexpected calls: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_indexer_error_contained() {
        let indexer = Arc::new(RecordingIndexer {
            fail: true,
            ..Default::default()
        });
        let d = dispatcher(indexer, Arc::new(MemoryRecordStore::new()), Age::Unknown);

        let outcome = d
            .handle_event(&event("forum.barazo.topic.reply", RecordAction::Create, Some(reply_record())))
            .await;
        assert!(matches!(outcome, DispatchOutcome::Failed(ref e) if e.contains("write conflict")));
        assert_eq!(d.stats().snapshot().failed, 1);
    }

    #[tokio::test]
    async fn test_indexer_panic_contained() {
        let indexer = Arc::new(RecordingIndexer {
            panic: true,
            ..Default::default()
        });
        let d = dispatcher(indexer, Arc::new(MemoryRecordStore::new()), Age::Unknown);

        let outcome = d
            .handle_event(&event("forum.barazo.topic.reply", RecordAction::Delete, None))
            .await;
        assert_eq!(outcome, DispatchOutcome::Failed("panic: indexer exploded".to_string()));

        // The next event is still processed
        let outcome = d
            .handle_event(&event("app.bsky.feed.like", RecordAction::Delete, None))
            .await;
        assert_eq!(outcome, DispatchOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_tombstoned_author_dropped() {
        let indexer = Arc::new(RecordingIndexer::default());
        let verifier = IdentityVerifier::new(
            Arc::new(MemoryKeyValueCache::new()),
            Arc::new(FixedDirectory(Some(DirectoryStatus::Tombstoned))),
        );
        let d = dispatcher(indexer.clone(), Arc::new(MemoryRecordStore::new()), Age::Unknown)
            .with_identity_verifier(verifier);

        let outcome = d
            .handle_event(&event("forum.barazo.topic.reply", RecordAction::Create, Some(reply_record())))
            .await;
        assert_eq!(
            outcome,
            DispatchOutcome::Dropped(DropReason::InactiveAuthor(InactiveReason::Tombstoned))
        );
        assert!(indexer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_directory_does_not_block_indexing() {
        let indexer = Arc::new(RecordingIndexer::default());
        let verifier = IdentityVerifier::new(
            Arc::new(MemoryKeyValueCache::new()),
            Arc::new(FixedDirectory(None)),
        );
        let d = dispatcher(indexer.clone(), Arc::new(MemoryRecordStore::new()), Age::Unknown)
            .with_identity_verifier(verifier);

        d.handle_event(&event("forum.barazo.topic.reply", RecordAction::Create, Some(reply_record())))
            .await;
        assert_eq!(indexer.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_indexer_is_contained_failure() {
        let indexer = Arc::new(RecordingIndexer::default());
        let d = RecordDispatcher::new(
            IndexerSet::new().with(SupportedCollection::TopicPost, indexer),
            Arc::new(MemoryRecordStore::new()),
            Arc::new(FixedAge(Age::Unknown)),
        );

        let outcome = d
            .handle_event(&event("forum.barazo.topic.reply", RecordAction::Delete, None))
            .await;
        assert!(matches!(outcome, DispatchOutcome::Failed(_)));
    }
}
