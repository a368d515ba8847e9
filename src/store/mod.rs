//! Storage adapters
//!
//! - **KeyValueCache**: expiring string cache (identity verdicts)
//! - **RecordStore**: local materialized records and known identities
//!
//! Each has a MongoDB implementation for production and an in-memory one
//! for dev mode and tests.

pub mod cache;
pub mod mongo;
pub mod records;

pub use cache::{KeyValueCache, MemoryKeyValueCache, MongoKeyValueCache, CACHE_COLLECTION, MAX_EXPIRE_SECS};
pub use mongo::MongoClient;
pub use records::{
    CountField, IdentityRow, MemoryRecordStore, MongoRecordStore, RecordStore, StoredRecord,
    IDENTITIES_COLLECTION, RECORDS_COLLECTION,
};
