//! Logging infrastructure
//!
//! Tracing subscriber setup plus ingestion counters.

pub mod stats;

pub use stats::{IngestSnapshot, IngestStats};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

/// Default filter when `RUST_LOG` is unset
pub fn default_filter(level: &str) -> String {
    format!("forum_indexer={},info", level)
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `level`.
pub fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level).into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .init(),
    }
}
