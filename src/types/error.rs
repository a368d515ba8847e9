//! Error types for the indexer
//!
//! One enum for every failure the pipeline can report, with conversions
//! from the client libraries it talks to.

/// Main error type for indexer operations
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Identity directory error: {0}")]
    Directory(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// Implement From conversions for common error types

impl From<std::io::Error> for IndexerError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidEvent(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for IndexerError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<async_nats::Error> for IndexerError {
    fn from(err: async_nats::Error) -> Self {
        Self::Nats(err.to_string())
    }
}

impl From<mongodb::error::Error> for IndexerError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Result type alias for indexer operations
pub type Result<T> = std::result::Result<T, IndexerError>;
