//! Identity verification with a staleness-tolerant cache
//!
//! Answers "is this identity currently valid?" for authors on the firehose.
//! Verdicts are cached per DID with two TTLs:
//!
//! ```text
//!   age <= soft TTL          -> cached verdict, no network
//!   soft TTL < age <= hard   -> cached verdict + detached background refresh
//!   miss / unreadable / old  -> synchronous directory lookup (5s timeout)
//! ```
//!
//! Cache trouble fails open toward live resolution. Directory trouble with
//! nothing cached fails closed: the caller gets `resolution failed`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::directory::{DirectoryStatus, IdentityDirectory};
use crate::store::KeyValueCache;
use crate::types::{IndexerError, Result};

/// Cached verdicts younger than this are served without revalidation
pub const DEFAULT_SOFT_TTL: Duration = Duration::from_secs(60 * 60);

/// Cache entry lifetime in the store
pub const DEFAULT_HARD_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Bound on a synchronous directory lookup
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Cache key namespace
pub const DEFAULT_KEY_PREFIX: &str = "identity:status:";

/// Why an identity is not active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InactiveReason {
    #[serde(rename = "tombstoned")]
    Tombstoned,
    #[serde(rename = "not found")]
    NotFound,
    #[serde(rename = "resolution failed")]
    ResolutionFailed,
}

impl InactiveReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tombstoned => "tombstoned",
            Self::NotFound => "not found",
            Self::ResolutionFailed => "resolution failed",
        }
    }
}

impl std::fmt::Display for InactiveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verification verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityStatus {
    Active,
    Inactive { reason: InactiveReason },
}

impl IdentityStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    fn inactive(reason: InactiveReason) -> Self {
        Self::Inactive { reason }
    }
}

impl From<DirectoryStatus> for IdentityStatus {
    fn from(status: DirectoryStatus) -> Self {
        match status {
            DirectoryStatus::Found => Self::Active,
            DirectoryStatus::Tombstoned => Self::inactive(InactiveReason::Tombstoned),
            DirectoryStatus::NotFound => Self::inactive(InactiveReason::NotFound),
        }
    }
}

/// Persisted verdict, one JSON value per identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedIdentityEntry {
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<InactiveReason>,
    pub resolved_at: DateTime<Utc>,
}

impl CachedIdentityEntry {
    pub fn new(status: IdentityStatus, resolved_at: DateTime<Utc>) -> Self {
        match status {
            IdentityStatus::Active => Self {
                active: true,
                reason: None,
                resolved_at,
            },
            IdentityStatus::Inactive { reason } => Self {
                active: false,
                reason: Some(reason),
                resolved_at,
            },
        }
    }

    pub fn status(&self) -> IdentityStatus {
        if self.active {
            IdentityStatus::Active
        } else {
            IdentityStatus::inactive(self.reason.unwrap_or(InactiveReason::ResolutionFailed))
        }
    }
}

/// Identities resolved by their own host rather than the directory
pub fn is_self_hosted(did: &str) -> bool {
    did.starts_with("did:web:")
}

/// Verifier configuration
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub soft_ttl: Duration,
    pub hard_ttl: Duration,
    pub resolve_timeout: Duration,
    pub key_prefix: String,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            soft_ttl: DEFAULT_SOFT_TTL,
            hard_ttl: DEFAULT_HARD_TTL,
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

/// Verifier counters
#[derive(Debug, Default)]
struct Counters {
    fresh_hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    resolution_failures: AtomicU64,
}

/// Snapshot of verifier counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifierStats {
    pub fresh_hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub resolution_failures: u64,
}

/// Cache-aside identity verifier
#[derive(Clone)]
pub struct IdentityVerifier {
    config: VerifierConfig,
    cache: Arc<dyn KeyValueCache>,
    directory: Arc<dyn IdentityDirectory>,
    counters: Arc<Counters>,
}

impl IdentityVerifier {
    pub fn new(cache: Arc<dyn KeyValueCache>, directory: Arc<dyn IdentityDirectory>) -> Self {
        Self::with_config(VerifierConfig::default(), cache, directory)
    }

    pub fn with_config(
        config: VerifierConfig,
        cache: Arc<dyn KeyValueCache>,
        directory: Arc<dyn IdentityDirectory>,
    ) -> Self {
        Self {
            config,
            cache,
            directory,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Cache key for an identity
    pub fn cache_key(&self, did: &str) -> String {
        format!("{}{}", self.config.key_prefix, did)
    }

    /// Verify an identity. Never fails; every outcome is a verdict.
    pub async fn verify(&self, did: &str) -> IdentityStatus {
        if is_self_hosted(did) {
            return IdentityStatus::Active;
        }

        if let Some(entry) = self.read_cached(did).await {
            let age = (Utc::now() - entry.resolved_at).to_std().unwrap_or(Duration::ZERO);

            if age <= self.config.soft_ttl {
                self.counters.fresh_hits.fetch_add(1, Ordering::Relaxed);
                debug!(did = %did, age_secs = age.as_secs(), "Identity verdict from cache");
                return entry.status();
            }

            if age <= self.config.hard_ttl {
                self.counters.stale_hits.fetch_add(1, Ordering::Relaxed);
                debug!(did = %did, age_secs = age.as_secs(), "Stale identity verdict, refreshing in background");
                self.spawn_revalidation(did);
                return entry.status();
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        match self.resolve(did).await {
            Ok(status) => {
                self.write_cached(did, status).await;
                status
            }
            Err(e) => {
                self.counters.resolution_failures.fetch_add(1, Ordering::Relaxed);
                warn!(did = %did, error = %e, "Identity resolution failed with nothing cached");
                IdentityStatus::inactive(InactiveReason::ResolutionFailed)
            }
        }
    }

    pub fn stats(&self) -> VerifierStats {
        VerifierStats {
            fresh_hits: self.counters.fresh_hits.load(Ordering::Relaxed),
            stale_hits: self.counters.stale_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            resolution_failures: self.counters.resolution_failures.load(Ordering::Relaxed),
        }
    }

    /// Launch one detached refresh for a stale entry.
    ///
    /// The task has no join handle and no cancellation hook, and nothing
    /// bounds how many are in flight: each stale read spawns its own. Two
    /// refreshes for the same DID both write; the last one wins. A refresh
    /// that fails or times out writes nothing, so the stale verdict keeps
    /// being served until the hard TTL expires it.
    fn spawn_revalidation(&self, did: &str) {
        let verifier = self.clone();
        let did = did.to_string();
        tokio::spawn(async move {
            match verifier.resolve(&did).await {
                Ok(status) => {
                    verifier.write_cached(&did, status).await;
                    debug!(did = %did, active = status.is_active(), "Background identity refresh complete");
                }
                Err(e) => {
                    warn!(did = %did, error = %e, "Background identity refresh failed");
                }
            }
        });
    }

    /// Ask the directory, bounded by the resolve timeout
    async fn resolve(&self, did: &str) -> Result<IdentityStatus> {
        match tokio::time::timeout(self.config.resolve_timeout, self.directory.resolve(did)).await {
            Ok(Ok(status)) => Ok(status.into()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(IndexerError::Directory(format!(
                "resolution timed out after {}ms",
                self.config.resolve_timeout.as_millis()
            ))),
        }
    }

    async fn read_cached(&self, did: &str) -> Option<CachedIdentityEntry> {
        let key = self.cache_key(did);
        let raw = match self.cache.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(did = %did, error = %e, "Identity cache read failed, resolving live");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(did = %did, error = %e, "Unreadable identity cache entry, resolving live");
                None
            }
        }
    }

    /// Best-effort write; failures are logged and never change the verdict
    async fn write_cached(&self, did: &str, status: IdentityStatus) {
        let entry = CachedIdentityEntry::new(status, Utc::now());
        let value = match serde_json::to_string(&entry) {
            Ok(v) => v,
            Err(e) => {
                warn!(did = %did, error = %e, "Failed to encode identity cache entry");
                return;
            }
        };

        if let Err(e) = self
            .cache
            .set(&self.cache_key(did), &value, self.config.hard_ttl.as_secs())
            .await
        {
            warn!(did = %did, error = %e, "Identity cache write failed");
        }
    }
}

impl std::fmt::Debug for IdentityVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityVerifier")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Log the verifier configuration at startup
pub fn log_config(config: &VerifierConfig) {
    info!(
        soft_ttl_secs = config.soft_ttl.as_secs(),
        hard_ttl_secs = config.hard_ttl.as_secs(),
        resolve_timeout_ms = config.resolve_timeout.as_millis() as u64,
        "Identity verifier configured"
    );
}
