//! Ingestion counters
//!
//! Cheap atomic counters updated once per event and logged periodically by
//! the stream consumer.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::info;

#[derive(Debug, Default)]
pub struct IngestStats {
    indexed: AtomicU64,
    ignored: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
    malformed: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSnapshot {
    pub indexed: u64,
    pub ignored: u64,
    pub dropped: u64,
    pub failed: u64,
    pub malformed: u64,
}

impl IngestSnapshot {
    pub fn total(&self) -> u64 {
        self.indexed + self.ignored + self.dropped + self.failed + self.malformed
    }
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Event reached an indexer
    pub fn incr_indexed(&self) {
        self.indexed.fetch_add(1, Ordering::Relaxed);
    }

    /// Event belonged to an unrelated collection
    pub fn incr_ignored(&self) {
        self.ignored.fetch_add(1, Ordering::Relaxed);
    }

    /// Event was rejected (invalid, missing payload, inactive author)
    pub fn incr_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Event handling raised an error or panicked
    pub fn incr_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Stream message could not be decoded as an event
    pub fn incr_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            indexed: self.indexed.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }

    /// Emit the counters as one structured log line
    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            indexed = s.indexed,
            ignored = s.ignored,
            dropped = s.dropped,
            failed = s.failed,
            malformed = s.malformed,
            "Ingest stats"
        );
    }
}
