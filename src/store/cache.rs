//! Key-value cache capability
//!
//! The identity verifier keeps one serialized verdict per DID here. Any
//! caller may read or write any key; there is no locking and the last
//! writer wins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bson::doc;
use dashmap::DashMap;
use mongodb::options::IndexOptions;
use mongodb::{Collection, IndexModel};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::mongo::MongoClient;
use crate::types::{IndexerError, Result};

/// Expiring string cache shared across components
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    /// Read a value. Errors on transport failure; `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value that expires after `expire_secs`, capped at `MAX_EXPIRE_SECS`
    async fn set(&self, key: &str, value: &str, expire_secs: u64) -> Result<()>;
}

/// Longest lifetime any entry can be given (one year)
pub const MAX_EXPIRE_SECS: u64 = 365 * 24 * 60 * 60;

/// Writes between sweeps of expired in-memory entries
const SWEEP_EVERY_WRITES: u64 = 1024;

// ============================================================================
// In-memory cache
// ============================================================================

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

/// Process-local cache for dev mode and tests.
///
/// Expired entries are dropped on read and swept every few writes, so keys
/// that are never read again do not accumulate.
pub struct MemoryKeyValueCache {
    entries: DashMap<String, MemoryEntry>,
    writes: AtomicU64,
    sweep_every: u64,
}

impl Default for MemoryKeyValueCache {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            writes: AtomicU64::new(0),
            sweep_every: SWEEP_EVERY_WRITES,
        }
    }
}

impl MemoryKeyValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove expired entries
    pub fn cleanup(&self) -> usize {
        let before = self.entries.len();
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl KeyValueCache for MemoryKeyValueCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > Instant::now() {
                return Ok(Some(entry.value.clone()));
            }
            // Entry expired, remove it
            drop(entry);
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, expire_secs: u64) -> Result<()> {
        if self.writes.fetch_add(1, Ordering::Relaxed) % self.sweep_every == self.sweep_every - 1 {
            let swept = self.cleanup();
            if swept > 0 {
                debug!(swept, "Swept expired cache entries");
            }
        }

        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Instant::now() + Duration::from_secs(expire_secs.min(MAX_EXPIRE_SECS)),
            },
        );
        Ok(())
    }
}

// ============================================================================
// MongoDB cache
// ============================================================================

/// Collection holding cache entries
pub const CACHE_COLLECTION: &str = "kv_cache";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheDocument {
    #[serde(rename = "_id")]
    key: String,
    value: String,
    expires_at: bson::DateTime,
}

/// Durable cache backed by a MongoDB TTL collection
#[derive(Clone)]
pub struct MongoKeyValueCache {
    collection: Collection<CacheDocument>,
}

impl MongoKeyValueCache {
    /// Open the cache collection and ensure the TTL index exists
    pub async fn new(mongo: &MongoClient) -> Result<Self> {
        let collection = mongo.collection::<CacheDocument>(CACHE_COLLECTION);

        let ttl_index = IndexModel::builder()
            .keys(doc! { "expires_at": 1 })
            .options(
                IndexOptions::builder()
                    .name("expires_at_ttl".to_string())
                    .expire_after(Duration::from_secs(0))
                    .build(),
            )
            .build();
        collection
            .create_index(ttl_index)
            .await
            .map_err(|e| IndexerError::Database(format!("Failed to create TTL index: {e}")))?;

        info!("Key-value cache ready in collection '{}'", CACHE_COLLECTION);
        Ok(Self { collection })
    }
}

#[async_trait]
impl KeyValueCache for MongoKeyValueCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        // The TTL monitor runs lazily, so filter expired documents here too
        let found = self
            .collection
            .find_one(doc! { "_id": key, "expires_at": { "$gt": bson::DateTime::now() } })
            .await
            .map_err(|e| IndexerError::Cache(e.to_string()))?;
        Ok(found.map(|d| d.value))
    }

    async fn set(&self, key: &str, value: &str, expire_secs: u64) -> Result<()> {
        let ttl_millis = (expire_secs.min(MAX_EXPIRE_SECS) * 1000) as i64;
        let expires_at = bson::DateTime::from_millis(bson::DateTime::now().timestamp_millis() + ttl_millis);
        let document = CacheDocument {
            key: key.to_string(),
            value: value.to_string(),
            expires_at,
        };
        self.collection
            .replace_one(doc! { "_id": key }, &document)
            .upsert(true)
            .await
            .map_err(|e| IndexerError::Cache(e.to_string()))?;
        debug!(key = key, ttl_secs = expire_secs, "Cache set");
        Ok(())
    }
}
