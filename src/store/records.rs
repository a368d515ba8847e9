//! Local record store
//!
//! Holds the materialized copy of indexed records plus the set of known
//! identities. The dispatcher only uses the compensating lookups and the
//! identity upsert; the projection indexer uses the write side.

use async_trait::async_trait;
use bson::{doc, Document};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mongodb::Collection;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use super::mongo::MongoClient;
use crate::types::{IndexerError, Result, SupportedCollection, TrustStatus};

/// Collection holding indexed records
pub const RECORDS_COLLECTION: &str = "records";

/// Collection holding known identities
pub const IDENTITIES_COLLECTION: &str = "identities";

/// Denormalized counter kept on a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountField {
    Replies,
    Reactions,
}

impl CountField {
    fn field_name(&self) -> &'static str {
        match self {
            Self::Replies => "reply_count",
            Self::Reactions => "reaction_count",
        }
    }
}

/// A record as materialized in the local store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Canonical `at://` URI
    #[serde(rename = "_id")]
    pub uri: String,
    pub did: String,
    /// Collection NSID
    pub collection: String,
    pub rkey: String,
    #[serde(default)]
    pub cid: Option<String>,
    pub record: JsonValue,
    /// Reply parent or reaction subject
    #[serde(default)]
    pub reference_uri: Option<String>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub indexed_at: DateTime<Utc>,
    #[serde(default)]
    pub trust_status: Option<TrustStatus>,
    #[serde(default)]
    pub reply_count: i64,
    #[serde(default)]
    pub reaction_count: i64,
}

/// Known identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRow {
    #[serde(rename = "_id")]
    pub did: String,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub first_seen: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub last_seen: DateTime<Utc>,
}

/// Local store capability
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Parent URI of a stored reply, `None` when the reply is gone
    async fn find_reply_parent(&self, uri: &str) -> Result<Option<String>>;

    /// Subject URI of a stored reaction, `None` when the reaction is gone
    async fn find_reaction_subject(&self, uri: &str) -> Result<Option<String>>;

    /// Record that an identity has been seen
    async fn upsert_identity(&self, did: &str) -> Result<()>;

    /// Insert or replace a record. Counters on an existing row are preserved.
    async fn upsert_record(&self, record: StoredRecord) -> Result<()>;

    /// Remove a record; returns whether a row existed
    async fn delete_record(&self, uri: &str) -> Result<bool>;

    /// Add `delta` to a counter, never going below zero. Missing rows are ignored.
    async fn adjust_count(&self, uri: &str, field: CountField, delta: i64) -> Result<()>;

    /// Fetch a record by URI
    async fn get_record(&self, uri: &str) -> Result<Option<StoredRecord>>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local store for dev mode and tests
#[derive(Default)]
pub struct MemoryRecordStore {
    records: DashMap<String, StoredRecord>,
    identities: DashMap<String, IdentityRow>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn identity(&self, did: &str) -> Option<IdentityRow> {
        self.identities.get(did).map(|r| r.clone())
    }

    fn reference_of(&self, uri: &str, collection: SupportedCollection) -> Option<String> {
        self.records
            .get(uri)
            .filter(|r| r.collection == collection.nsid())
            .and_then(|r| r.reference_uri.clone())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find_reply_parent(&self, uri: &str) -> Result<Option<String>> {
        Ok(self.reference_of(uri, SupportedCollection::TopicReply))
    }

    async fn find_reaction_subject(&self, uri: &str) -> Result<Option<String>> {
        Ok(self.reference_of(uri, SupportedCollection::Reaction))
    }

    async fn upsert_identity(&self, did: &str) -> Result<()> {
        let now = Utc::now();
        self.identities
            .entry(did.to_string())
            .and_modify(|row| row.last_seen = now)
            .or_insert_with(|| IdentityRow {
                did: did.to_string(),
                first_seen: now,
                last_seen: now,
            });
        Ok(())
    }

    async fn upsert_record(&self, mut record: StoredRecord) -> Result<()> {
        if let Some(existing) = self.records.get(&record.uri) {
            record.reply_count = existing.reply_count;
            record.reaction_count = existing.reaction_count;
        }
        self.records.insert(record.uri.clone(), record);
        Ok(())
    }

    async fn delete_record(&self, uri: &str) -> Result<bool> {
        Ok(self.records.remove(uri).is_some())
    }

    async fn adjust_count(&self, uri: &str, field: CountField, delta: i64) -> Result<()> {
        if let Some(mut record) = self.records.get_mut(uri) {
            let counter = match field {
                CountField::Replies => &mut record.reply_count,
                CountField::Reactions => &mut record.reaction_count,
            };
            *counter = (*counter + delta).max(0);
        }
        Ok(())
    }

    async fn get_record(&self, uri: &str) -> Result<Option<StoredRecord>> {
        Ok(self.records.get(uri).map(|r| r.clone()))
    }
}

// ============================================================================
// MongoDB store
// ============================================================================

#[derive(Debug, Deserialize)]
struct ReferenceOnly {
    #[serde(default)]
    reference_uri: Option<String>,
}

/// Store backed by MongoDB collections
#[derive(Clone)]
pub struct MongoRecordStore {
    records: Collection<StoredRecord>,
    identities: Collection<IdentityRow>,
}

impl MongoRecordStore {
    pub async fn new(mongo: &MongoClient) -> Result<Self> {
        let store = Self {
            records: mongo.collection(RECORDS_COLLECTION),
            identities: mongo.collection(IDENTITIES_COLLECTION),
        };
        store.ensure_indexes().await?;
        info!(
            "Record store ready in database '{}' ('{}', '{}')",
            mongo.db_name(),
            RECORDS_COLLECTION,
            IDENTITIES_COLLECTION
        );
        Ok(store)
    }

    async fn ensure_indexes(&self) -> Result<()> {
        let indexes = [doc! { "did": 1, "collection": 1 }, doc! { "reference_uri": 1 }];
        for keys in indexes {
            self.records
                .create_index(mongodb::IndexModel::builder().keys(keys).build())
                .await
                .map_err(|e| IndexerError::Database(format!("Failed to create index: {e}")))?;
        }
        Ok(())
    }

    async fn reference_of(&self, uri: &str, collection: SupportedCollection) -> Result<Option<String>> {
        let found = self
            .records
            .clone_with_type::<ReferenceOnly>()
            .find_one(doc! { "_id": uri, "collection": collection.nsid() })
            .projection(doc! { "reference_uri": 1 })
            .await?;
        Ok(found.and_then(|r| r.reference_uri))
    }
}

#[async_trait]
impl RecordStore for MongoRecordStore {
    async fn find_reply_parent(&self, uri: &str) -> Result<Option<String>> {
        self.reference_of(uri, SupportedCollection::TopicReply).await
    }

    async fn find_reaction_subject(&self, uri: &str) -> Result<Option<String>> {
        self.reference_of(uri, SupportedCollection::Reaction).await
    }

    async fn upsert_identity(&self, did: &str) -> Result<()> {
        let now = bson::DateTime::now();
        self.identities
            .update_one(
                doc! { "_id": did },
                doc! {
                    "$setOnInsert": { "first_seen": now },
                    "$set": { "last_seen": now },
                },
            )
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn upsert_record(&self, record: StoredRecord) -> Result<()> {
        let uri = record.uri.clone();
        let mut fields = bson::to_document(&record)
            .map_err(|e| IndexerError::Internal(format!("Failed to encode record: {e}")))?;
        fields.remove("_id");
        fields.remove("reply_count");
        fields.remove("reaction_count");

        self.records
            .update_one(
                doc! { "_id": uri.as_str() },
                doc! {
                    "$set": fields,
                    "$setOnInsert": { "reply_count": 0_i64, "reaction_count": 0_i64 },
                },
            )
            .upsert(true)
            .await?;
        debug!(uri = %uri, "Record upserted");
        Ok(())
    }

    async fn delete_record(&self, uri: &str) -> Result<bool> {
        let result = self.records.delete_one(doc! { "_id": uri }).await?;
        Ok(result.deleted_count > 0)
    }

    async fn adjust_count(&self, uri: &str, field: CountField, delta: i64) -> Result<()> {
        let name = field.field_name();
        let mut filter = doc! { "_id": uri };
        if delta < 0 {
            filter.insert(name, doc! { "$gte": -delta });
        }
        let mut increment = Document::new();
        increment.insert(name, delta);
        self.records
            .update_one(filter, doc! { "$inc": increment })
            .await?;
        Ok(())
    }

    async fn get_record(&self, uri: &str) -> Result<Option<StoredRecord>> {
        Ok(self.records.find_one(doc! { "_id": uri }).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reply(uri: &str, parent: &str) -> StoredRecord {
        StoredRecord {
            uri: uri.to_string(),
            did: "did:plc:alice".to_string(),
            collection: SupportedCollection::TopicReply.nsid().to_string(),
            rkey: "3k".to_string(),
            cid: None,
            record: json!({}),
            reference_uri: Some(parent.to_string()),
            created_at: Utc::now(),
            indexed_at: Utc::now(),
            trust_status: None,
            reply_count: 0,
            reaction_count: 0,
        }
    }

    #[tokio::test]
    async fn test_reply_parent_lookup() {
        let store = MemoryRecordStore::new();
        store
            .upsert_record(reply("at://reply", "at://topic"))
            .await
            .unwrap();

        assert_eq!(
            store.find_reply_parent("at://reply").await.unwrap(),
            Some("at://topic".to_string())
        );
        // Wrong collection is not a match
        assert_eq!(store.find_reaction_subject("at://reply").await.unwrap(), None);
        assert_eq!(store.find_reply_parent("at://missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_counts_never_negative() {
        let store = MemoryRecordStore::new();
        store.upsert_record(reply("at://r", "at://t")).await.unwrap();

        store.adjust_count("at://r", CountField::Replies, 1).await.unwrap();
        store.adjust_count("at://r", CountField::Replies, -1).await.unwrap();
        store.adjust_count("at://r", CountField::Replies, -1).await.unwrap();
        assert_eq!(store.get_record("at://r").await.unwrap().unwrap().reply_count, 0);

        // Missing row is ignored
        store.adjust_count("at://gone", CountField::Reactions, -1).await.unwrap();
    }

    #[tokio::test]
    async fn test_upsert_preserves_counts() {
        let store = MemoryRecordStore::new();
        store.upsert_record(reply("at://r", "at://t")).await.unwrap();
        store.adjust_count("at://r", CountField::Reactions, 3).await.unwrap();
        store.upsert_record(reply("at://r", "at://t")).await.unwrap();
        assert_eq!(store.get_record("at://r").await.unwrap().unwrap().reaction_count, 3);
    }

    #[tokio::test]
    async fn test_identity_upsert_keeps_first_seen() {
        let store = MemoryRecordStore::new();
        store.upsert_identity("did:plc:alice").await.unwrap();
        let first = store.identity("did:plc:alice").unwrap();
        store.upsert_identity("did:plc:alice").await.unwrap();
        let second = store.identity("did:plc:alice").unwrap();
        assert_eq!(first.first_seen, second.first_seen);
        assert!(second.last_seen >= first.last_seen);
    }

    #[tokio::test]
    async fn test_delete_record() {
        let store = MemoryRecordStore::new();
        store.upsert_record(reply("at://r", "at://t")).await.unwrap();
        assert!(store.delete_record("at://r").await.unwrap());
        assert!(!store.delete_record("at://r").await.unwrap());
    }
}
