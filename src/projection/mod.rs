//! Record projection
//!
//! Minimal indexer for all forum collections. Materializes each record into
//! the local `RecordStore` and keeps the denormalized reply and reaction
//! counters on the records they point at.
//!
//! Counters move only when a row actually appears or disappears, so
//! redelivered creates and deletes leave them untouched.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::ingest::{clamp_created_at, CreateRecord, DeleteRecord, Indexer, UpdateRecord};
use crate::store::{CountField, RecordStore, StoredRecord};
use crate::types::{IndexerError, RecordUri, Result, SupportedCollection};

/// Field holding the URI a record counts toward, per collection
fn reference_pointer(collection: SupportedCollection) -> Option<&'static str> {
    match collection {
        SupportedCollection::TopicPost => None,
        SupportedCollection::TopicReply => Some("/parent/uri"),
        SupportedCollection::Reaction => Some("/subject/uri"),
    }
}

fn count_field(collection: SupportedCollection) -> Option<CountField> {
    match collection {
        SupportedCollection::TopicPost => None,
        SupportedCollection::TopicReply => Some(CountField::Replies),
        SupportedCollection::Reaction => Some(CountField::Reactions),
    }
}

fn collection_of(uri: &str) -> Result<SupportedCollection> {
    RecordUri::parse(uri)
        .map(|u| u.collection)
        .ok_or_else(|| IndexerError::InvalidEvent(format!("not a forum record URI: {uri}")))
}

pub struct ProjectionIndexer {
    store: Arc<dyn RecordStore>,
}

impl ProjectionIndexer {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    fn build(
        &self,
        collection: SupportedCollection,
        uri: &str,
        did: &str,
        rkey: &str,
        cid: Option<String>,
        record: JsonValue,
    ) -> StoredRecord {
        let now = Utc::now();
        let created_at = record
            .get("createdAt")
            .and_then(JsonValue::as_str)
            .map(|raw| clamp_created_at(raw, now))
            .unwrap_or(now);
        let reference_uri = reference_pointer(collection)
            .and_then(|ptr| record.pointer(ptr))
            .and_then(JsonValue::as_str)
            .map(str::to_string);

        StoredRecord {
            uri: uri.to_string(),
            did: did.to_string(),
            collection: collection.nsid().to_string(),
            rkey: rkey.to_string(),
            cid,
            record,
            reference_uri,
            created_at,
            indexed_at: now,
            trust_status: None,
            reply_count: 0,
            reaction_count: 0,
        }
    }
}

#[async_trait]
impl Indexer for ProjectionIndexer {
    async fn handle_create(&self, op: CreateRecord) -> Result<()> {
        let collection = collection_of(&op.uri)?;
        let existed = self.store.get_record(&op.uri).await?.is_some();

        let mut stored = self.build(collection, &op.uri, &op.did, &op.rkey, op.cid, op.record);
        stored.trust_status = Some(op.trust_status);
        let reference = stored.reference_uri.clone();
        self.store.upsert_record(stored).await?;

        if existed {
            debug!(uri = %op.uri, "Record already indexed, counters unchanged");
            return Ok(());
        }
        if let (Some(field), Some(reference)) = (count_field(collection), reference) {
            self.store.adjust_count(&reference, field, 1).await?;
        }
        debug!(uri = %op.uri, trust = %op.trust_status, "Indexed record");
        Ok(())
    }

    async fn handle_update(&self, op: UpdateRecord) -> Result<()> {
        let collection = collection_of(&op.uri)?;
        let previous = self.store.get_record(&op.uri).await?;

        let mut stored = self.build(collection, &op.uri, &op.did, &op.rkey, op.cid, op.record);
        if let Some(previous) = previous {
            stored.trust_status = previous.trust_status;
            // References are immutable once counted
            stored.reference_uri = previous.reference_uri;
        }
        self.store.upsert_record(stored).await?;
        debug!(uri = %op.uri, "Updated record");
        Ok(())
    }

    async fn handle_delete(&self, op: DeleteRecord) -> Result<()> {
        let collection = collection_of(&op.uri)?;
        let removed = self.store.delete_record(&op.uri).await?;
        if !removed {
            debug!(uri = %op.uri, "Record not indexed, nothing to delete");
            return Ok(());
        }
        if let (Some(field), Some(reference)) = (count_field(collection), op.reference_uri.as_deref()) {
            self.store.adjust_count(reference, field, -1).await?;
        }
        debug!(uri = %op.uri, "Deleted record");
        Ok(())
    }
}
