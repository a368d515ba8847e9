//! Firehose ingestion
//!
//! ```text
//! JetStream ─▶ EventConsumer ─▶ RecordDispatcher ─▶ Indexer (per collection)
//!                                 │
//!                                 ├─ RecordValidator (size + lexicon)
//!                                 ├─ AccountAge (trust on create)
//!                                 └─ IdentityVerifier (optional author gate)
//! ```

pub mod clamp;
pub mod consumer;
pub mod dispatcher;
pub mod event;
pub mod indexer;
pub mod lexicon;
pub mod validator;

pub use clamp::{clamp_created_at, clamp_timestamp, MAX_FUTURE_SKEW_SECS, MAX_PAST_SKEW_SECS};
pub use consumer::{decode_event, ConsumerConfig, EventConsumer};
pub use dispatcher::{DispatchOutcome, DropReason, RecordDispatcher};
pub use event::{RecordAction, RecordEvent};
pub use indexer::{CreateRecord, DeleteRecord, Indexer, IndexerSet, UpdateRecord};
pub use lexicon::{schema_for, RecordSchema};
pub use validator::{RecordValidator, ValidationResult, MAX_RECORD_BYTES};
