//! Configuration for the forum indexer
//!
//! CLI arguments with environment variable fallbacks, using clap.

use std::time::Duration;

use clap::Parser;
use uuid::Uuid;

use crate::identity::verifier::DEFAULT_KEY_PREFIX;
use crate::identity::{DirectoryConfig, VerifierConfig, DEFAULT_DIRECTORY_URL};
use crate::ingest::consumer::{DEFAULT_CONSUMER_NAME, DEFAULT_STREAM_NAME, DEFAULT_SUBJECT};
use crate::ingest::ConsumerConfig;
use crate::logging::LogFormat;
use crate::store::MAX_EXPIRE_SECS;

/// Forum indexer - firehose consumer for forum records
#[derive(Parser, Debug, Clone)]
#[command(name = "forum-indexer")]
#[command(about = "Indexes forum records from the repository firehose")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Development mode (in-memory stores when MongoDB is unavailable)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// NATS configuration
    #[command(flatten)]
    pub nats: NatsArgs,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "forum_indexer")]
    pub mongodb_db: String,

    /// Identity directory base URL
    #[arg(long, env = "IDENTITY_DIRECTORY_URL", default_value = DEFAULT_DIRECTORY_URL)]
    pub identity_directory_url: String,

    /// Timeout for directory requests in milliseconds
    #[arg(long, env = "DIRECTORY_TIMEOUT_MS", default_value = "5000")]
    pub directory_timeout_ms: u64,

    /// Age after which a cached identity verdict is refreshed in the background
    #[arg(long, env = "IDENTITY_SOFT_TTL_SECS", default_value = "3600")]
    pub identity_soft_ttl_secs: u64,

    /// Age after which a cached identity verdict is discarded
    #[arg(long, env = "IDENTITY_HARD_TTL_SECS", default_value = "7200")]
    pub identity_hard_ttl_secs: u64,

    /// Key prefix for cached identity verdicts
    #[arg(long, env = "IDENTITY_CACHE_PREFIX", default_value = DEFAULT_KEY_PREFIX)]
    pub identity_cache_prefix: String,

    /// Drop creates and updates from tombstoned or unknown authors
    #[arg(long, env = "VERIFY_AUTHORS", default_value = "true", action = clap::ArgAction::Set)]
    pub verify_authors: bool,

    /// Seconds between ingest stats log lines (0 disables)
    #[arg(long, env = "STATS_INTERVAL_SECS", default_value = "60")]
    pub stats_interval_secs: u64,
}

/// NATS configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,

    /// JetStream stream carrying firehose events
    #[arg(long, env = "EVENT_STREAM", default_value = DEFAULT_STREAM_NAME)]
    pub event_stream: String,

    /// Subject filter for firehose events
    #[arg(long, env = "EVENT_SUBJECT", default_value = DEFAULT_SUBJECT)]
    pub event_subject: String,

    /// Durable consumer name
    #[arg(long, env = "CONSUMER_NAME", default_value = DEFAULT_CONSUMER_NAME)]
    pub consumer_name: String,

    /// Maximum messages per fetch
    #[arg(long, env = "FETCH_BATCH", default_value = "100")]
    pub fetch_batch: usize,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.identity_soft_ttl_secs == 0 {
            return Err("IDENTITY_SOFT_TTL_SECS must be greater than zero".to_string());
        }
        if self.identity_soft_ttl_secs >= self.identity_hard_ttl_secs {
            return Err(
                "IDENTITY_SOFT_TTL_SECS must be less than IDENTITY_HARD_TTL_SECS".to_string(),
            );
        }
        if self.identity_hard_ttl_secs > MAX_EXPIRE_SECS {
            return Err(format!(
                "IDENTITY_HARD_TTL_SECS must not exceed {MAX_EXPIRE_SECS}"
            ));
        }
        if self.directory_timeout_ms == 0 {
            return Err("DIRECTORY_TIMEOUT_MS must be greater than zero".to_string());
        }
        if self.identity_directory_url.trim().is_empty() {
            return Err("IDENTITY_DIRECTORY_URL must not be empty".to_string());
        }
        if self.nats.nats_url.trim().is_empty() {
            return Err("NATS_URL must not be empty".to_string());
        }
        if self.nats.fetch_batch == 0 {
            return Err("FETCH_BATCH must be greater than zero".to_string());
        }
        Ok(())
    }

    pub fn directory_timeout(&self) -> Duration {
        Duration::from_millis(self.directory_timeout_ms)
    }

    pub fn directory_config(&self) -> DirectoryConfig {
        DirectoryConfig {
            base_url: self.identity_directory_url.trim_end_matches('/').to_string(),
            request_timeout: self.directory_timeout(),
        }
    }

    pub fn verifier_config(&self) -> VerifierConfig {
        VerifierConfig {
            soft_ttl: Duration::from_secs(self.identity_soft_ttl_secs),
            hard_ttl: Duration::from_secs(self.identity_hard_ttl_secs),
            resolve_timeout: self.directory_timeout(),
            key_prefix: self.identity_cache_prefix.clone(),
        }
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            stream_name: self.nats.event_stream.clone(),
            subject: self.nats.event_subject.clone(),
            consumer_name: self.nats.consumer_name.clone(),
            fetch_batch: self.nats.fetch_batch,
            stats_interval: (self.stats_interval_secs > 0)
                .then(|| Duration::from_secs(self.stats_interval_secs)),
        }
    }
}
