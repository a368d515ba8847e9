//! Event stream consumer - NATS JetStream pull consumer for firehose events
//!
//! Binds a durable consumer on the event subject, fetches batches, decodes
//! each message as a `RecordEvent` and hands it to the dispatcher. Every
//! message is acked once handled, including malformed ones; the dispatcher
//! already contains all per-event failures so redelivery would not help.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::{self, consumer::PullConsumer, stream::Stream};
use async_nats::ConnectOptions;
use futures_util::StreamExt;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::dispatcher::RecordDispatcher;
use super::event::RecordEvent;
use crate::config::NatsArgs;
use crate::logging::IngestStats;
use crate::types::{IndexerError, Result};

pub const DEFAULT_STREAM_NAME: &str = "FIREHOSE_EVENTS";
pub const DEFAULT_SUBJECT: &str = "firehose.events.>";
pub const DEFAULT_CONSUMER_NAME: &str = "forum_indexer";

/// How long a fetch waits for messages before returning an empty batch
const FETCH_EXPIRY: Duration = Duration::from_secs(5);

/// Consumer configuration
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub stream_name: String,
    pub subject: String,
    /// Durable consumer name, shared by all replicas of this service
    pub consumer_name: String,
    pub fetch_batch: usize,
    /// Interval between stats log lines, `None` disables them
    pub stats_interval: Option<Duration>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            stream_name: DEFAULT_STREAM_NAME.to_string(),
            subject: DEFAULT_SUBJECT.to_string(),
            consumer_name: DEFAULT_CONSUMER_NAME.to_string(),
            fetch_batch: 100,
            stats_interval: Some(Duration::from_secs(60)),
        }
    }
}

/// Decode a raw stream message body
pub fn decode_event(payload: &[u8]) -> Result<RecordEvent> {
    Ok(serde_json::from_slice(payload)?)
}

/// Delay before fetching again after a failed batch
const BATCH_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Pending shutdown check. A closed or lagged channel also means stop.
fn shutdown_requested(shutdown: &mut broadcast::Receiver<()>) -> bool {
    !matches!(shutdown.try_recv(), Err(TryRecvError::Empty))
}

/// Run batches back to back until shutdown is requested. Returns the number
/// of messages handled.
///
/// Nothing races a batch: the signal is checked before each fetch.
pub(crate) async fn consume_batches<F, Fut>(shutdown: &mut broadcast::Receiver<()>, mut next_batch: F) -> usize
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<usize>>,
{
    let mut total = 0;
    while !shutdown_requested(shutdown) {
        match next_batch().await {
            Ok(count) => {
                if count > 0 {
                    debug!(count, "Processed batch");
                }
                total += count;
            }
            Err(e) => {
                error!(error = %e, "Error processing batch");
                tokio::time::sleep(BATCH_RETRY_DELAY).await;
            }
        }
    }
    total
}

/// Log ingest counters on a fixed interval from a separate task
pub fn spawn_stats_reporter(
    stats: Arc<IngestStats>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => stats.log_summary(),
            }
        }
    })
}

pub struct EventConsumer {
    config: ConsumerConfig,
    jetstream: jetstream::Context,
    dispatcher: Arc<RecordDispatcher>,
}

impl EventConsumer {
    /// Connect to NATS and prepare the JetStream context
    pub async fn connect(
        nats: &NatsArgs,
        config: ConsumerConfig,
        dispatcher: Arc<RecordDispatcher>,
    ) -> Result<Self> {
        info!(url = %nats.nats_url, "Connecting to NATS");

        let mut options = ConnectOptions::new()
            .name(&config.consumer_name)
            .connection_timeout(Duration::from_secs(5));
        if let (Some(user), Some(pass)) = (&nats.nats_user, &nats.nats_password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(&nats.nats_url)
            .await
            .map_err(|e| IndexerError::Nats(format!("Failed to connect: {e}")))?;

        info!(url = %nats.nats_url, "Connected to NATS");

        Ok(Self {
            config,
            jetstream: jetstream::new(client),
            dispatcher,
        })
    }

    /// Consume until a shutdown signal arrives.
    ///
    /// Shutdown is observed between batches only, so every fetched message is
    /// dispatched to completion and acked before the loop exits.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let stream = self.ensure_stream().await?;
        let consumer = self.ensure_consumer(&stream).await?;
        let stats = self.dispatcher.stats();

        let reporter = self
            .config
            .stats_interval
            .map(|interval| spawn_stats_reporter(stats.clone(), interval, shutdown.resubscribe()));

        info!(
            stream = %self.config.stream_name,
            consumer = %self.config.consumer_name,
            "Event consumer started"
        );

        let processed = consume_batches(&mut shutdown, || self.process_batch(&consumer)).await;
        info!(processed, "Event consumer shutting down");

        if let Some(reporter) = reporter {
            reporter.abort();
        }
        stats.log_summary();
        Ok(())
    }

    /// Ensure the event stream exists
    async fn ensure_stream(&self) -> Result<Stream> {
        let stream = self
            .jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: self.config.stream_name.clone(),
                subjects: vec![self.config.subject.clone()],
                max_age: Duration::from_secs(24 * 3600),
                storage: jetstream::stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| IndexerError::Nats(format!("Failed to create stream: {e}")))?;

        info!(
            stream = %self.config.stream_name,
            subject = %self.config.subject,
            "Using event stream"
        );
        Ok(stream)
    }

    async fn ensure_consumer(&self, stream: &Stream) -> Result<PullConsumer> {
        let name = &self.config.consumer_name;
        let consumer = stream
            .get_or_create_consumer(
                name,
                jetstream::consumer::pull::Config {
                    durable_name: Some(name.clone()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    filter_subject: self.config.subject.clone(),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| IndexerError::Nats(format!("Failed to create consumer: {e}")))?;

        info!(consumer = %name, "Using durable consumer");
        Ok(consumer)
    }

    async fn process_batch(&self, consumer: &PullConsumer) -> Result<usize> {
        let mut messages = consumer
            .fetch()
            .max_messages(self.config.fetch_batch)
            .expires(FETCH_EXPIRY)
            .messages()
            .await
            .map_err(|e| IndexerError::Nats(format!("Failed to fetch messages: {e}")))?;

        let mut count = 0;
        while let Some(msg_result) = messages.next().await {
            match msg_result {
                Ok(msg) => {
                    count += 1;
                    self.process_message(msg).await;
                }
                Err(e) => warn!(error = %e, "Error receiving message"),
            }
        }
        Ok(count)
    }

    async fn process_message(&self, msg: jetstream::Message) {
        match decode_event(&msg.payload) {
            Ok(event) => {
                self.dispatcher.handle_event(&event).await;
            }
            Err(e) => {
                self.dispatcher.stats().incr_malformed();
                error!(subject = %msg.subject, error = %e, "Malformed event, skipping");
            }
        }

        if let Err(e) = msg.ack().await {
            warn!(error = %e, "Failed to ack message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::AccountAge;
    use crate::ingest::{IndexerSet, RecordAction};
    use crate::projection::ProjectionIndexer;
    use crate::store::{CountField, MemoryRecordStore, RecordStore, StoredRecord};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    #[test]
    fn test_decode_event() {
        let payload = br#"{
            "id": 7,
            "collection": "forum.barazo.interaction.reaction",
            "action": "delete",
            "did": "did:plc:alice",
            "rkey": "3kabc"
        }"#;
        let event = decode_event(payload).unwrap();
        assert_eq!(event.id, 7);
        assert_eq!(event.action, RecordAction::Delete);
        assert!(event.record.is_none());
    }

    #[test]
    fn test_decode_malformed() {
        let err = decode_event(b"not json").unwrap_err();
        assert!(matches!(err, IndexerError::InvalidEvent(_)));

        let err = decode_event(br#"{"id": 1, "action": "purge"}"#).unwrap_err();
        assert!(matches!(err, IndexerError::InvalidEvent(_)));
    }

    struct UnknownAge;

    #[async_trait]
    impl AccountAge for UnknownAge {
        async fn resolve_creation_date(&self, _did: &str) -> Result<Option<DateTime<Utc>>> {
            Ok(None)
        }
    }

    /// Memory store whose counter writes take a round trip's worth of time
    struct SlowCounterStore {
        inner: MemoryRecordStore,
        delay: Duration,
    }

    #[async_trait]
    impl RecordStore for SlowCounterStore {
        async fn find_reply_parent(&self, uri: &str) -> Result<Option<String>> {
            self.inner.find_reply_parent(uri).await
        }

        async fn find_reaction_subject(&self, uri: &str) -> Result<Option<String>> {
            self.inner.find_reaction_subject(uri).await
        }

        async fn upsert_identity(&self, did: &str) -> Result<()> {
            self.inner.upsert_identity(did).await
        }

        async fn upsert_record(&self, record: StoredRecord) -> Result<()> {
            self.inner.upsert_record(record).await
        }

        async fn delete_record(&self, uri: &str) -> Result<bool> {
            self.inner.delete_record(uri).await
        }

        async fn adjust_count(&self, uri: &str, field: CountField, delta: i64) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.adjust_count(uri, field, delta).await
        }

        async fn get_record(&self, uri: &str) -> Result<Option<StoredRecord>> {
            self.inner.get_record(uri).await
        }
    }

    const TOPIC: &str = "at://did:plc:op/forum.barazo.topic.post/3ktopic";

    fn reply_create() -> RecordEvent {
        RecordEvent {
            id: 2,
            collection: "forum.barazo.topic.reply".to_string(),
            action: RecordAction::Create,
            did: "did:plc:bob".to_string(),
            rkey: "3kreply".to_string(),
            record: Some(json!({
                "content": "Welcome",
                "root": {"uri": TOPIC, "cid": "bafytopic"},
                "parent": {"uri": TOPIC, "cid": "bafytopic"},
                "community": "did:plc:community",
                "createdAt": Utc::now().to_rfc3339()
            })),
            cid: Some("bafyreply".to_string()),
            live: true,
        }
    }

    async fn seeded_store() -> Arc<SlowCounterStore> {
        let store = Arc::new(SlowCounterStore {
            inner: MemoryRecordStore::new(),
            delay: Duration::from_millis(50),
        });
        store
            .upsert_record(StoredRecord {
                uri: TOPIC.to_string(),
                did: "did:plc:op".to_string(),
                collection: "forum.barazo.topic.post".to_string(),
                rkey: "3ktopic".to_string(),
                cid: None,
                record: json!({}),
                reference_uri: None,
                created_at: Utc::now(),
                indexed_at: Utc::now(),
                trust_status: None,
                reply_count: 0,
                reaction_count: 0,
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_batch_in_flight() {
        let store = seeded_store().await;
        let dispatcher = Arc::new(RecordDispatcher::new(
            IndexerSet::uniform(Arc::new(ProjectionIndexer::new(store.clone()))),
            store.clone(),
            Arc::new(UnknownAge),
        ));

        let (tx, mut rx) = broadcast::channel(1);
        let reporter = spawn_stats_reporter(dispatcher.stats(), Duration::from_millis(5), tx.subscribe());
        tokio::spawn(async move {
            // Lands while the reply count write is still sleeping
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = tx.send(());
        });

        let handled = consume_batches(&mut rx, || {
            let dispatcher = dispatcher.clone();
            async move {
                dispatcher.handle_event(&reply_create()).await;
                Ok(1)
            }
        })
        .await;

        assert_eq!(handled, 1);
        let topic = store.get_record(TOPIC).await.unwrap().unwrap();
        assert_eq!(topic.reply_count, 1);
        assert_eq!(dispatcher.stats().snapshot().indexed, 1);
        reporter.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_stop_consuming() {
        let (tx, mut rx) = broadcast::channel(1);
        let mut calls = 0;

        let handled = consume_batches(&mut rx, || {
            calls += 1;
            let attempt = calls;
            let tx = tx.clone();
            async move {
                if attempt == 1 {
                    return Err(IndexerError::Nats("fetch timed out".into()));
                }
                let _ = tx.send(());
                Ok(3)
            }
        })
        .await;

        assert_eq!(calls, 2);
        assert_eq!(handled, 3);
    }

    #[test]
    fn test_default_config() {
        let config = ConsumerConfig::default();
        assert_eq!(config.consumer_name, "forum_indexer");
        assert_eq!(config.fetch_batch, 100);
    }
}
