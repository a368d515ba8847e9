//! Forum indexer - firehose ingestion for forum records
//!
//! Consumes repository record events, keeps the forum collections, validates
//! them and routes each one to the indexer for its collection.
//!
//! ## Components
//!
//! - **Ingest**: event decoding, validation, timestamp clamping and dispatch
//! - **Identity**: directory lookups, cached author verification, account age
//! - **Store**: MongoDB and in-memory adapters for records and cached verdicts
//! - **Projection**: default indexer materializing records into the store

pub mod config;
pub mod identity;
pub mod ingest;
pub mod logging;
pub mod projection;
pub mod store;
pub mod types;

pub use config::Args;
pub use ingest::{DispatchOutcome, RecordDispatcher, RecordEvent};
pub use types::{IndexerError, Result};
