//! Account age lookups for trust classification
//!
//! New accounts (created less than 24 hours ago) are flagged so moderation
//! can weight their content. The creation date comes from the first
//! operation in the directory's audit log and never changes, so resolved
//! dates are memoized. The memo is bounded in both age and size.

use std::time::{Duration as StdDuration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use tracing::debug;

use super::directory::is_directory_did;
use crate::types::{IndexerError, Result, TrustStatus};

/// Accounts younger than this are classified as new
pub const NEW_ACCOUNT_WINDOW_HOURS: i64 = 24;

/// How long a resolved creation date is memoized
pub const DEFAULT_MEMO_TTL: StdDuration = StdDuration::from_secs(24 * 60 * 60);

/// Memo size at which eviction kicks in
pub const DEFAULT_MAX_MEMO_ENTRIES: usize = 10_000;

/// Classify an account by creation date relative to `now`.
///
/// Unknown creation dates are trusted.
pub fn trust_status_at(created_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> TrustStatus {
    match created_at {
        Some(created) if now - created < Duration::hours(NEW_ACCOUNT_WINDOW_HOURS) => TrustStatus::New,
        _ => TrustStatus::Trusted,
    }
}

/// Account-age capability
#[async_trait]
pub trait AccountAge: Send + Sync {
    /// Creation date of an identity, if it can be determined
    async fn resolve_creation_date(&self, did: &str) -> Result<Option<DateTime<Utc>>>;

    /// Classify a resolved creation date
    fn determine_trust_status(&self, created_at: Option<DateTime<Utc>>) -> TrustStatus {
        trust_status_at(created_at, Utc::now())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuditEntry {
    created_at: DateTime<Utc>,
}

struct KnownDate {
    created_at: DateTime<Utc>,
    expires_at: Instant,
}

/// Account age from the directory audit log
pub struct DirectoryAccountAge {
    base_url: String,
    http_client: reqwest::Client,
    known: DashMap<String, KnownDate>,
    memo_ttl: StdDuration,
    max_entries: usize,
}

impl DirectoryAccountAge {
    /// Share the directory's HTTP client and base URL
    pub fn new(base_url: &str, http_client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
            known: DashMap::new(),
            memo_ttl: DEFAULT_MEMO_TTL,
            max_entries: DEFAULT_MAX_MEMO_ENTRIES,
        }
    }

    /// Number of memoized creation dates
    pub fn memo_len(&self) -> usize {
        self.known.len()
    }

    fn audit_url(&self, did: &str) -> String {
        format!("{}/{}/log/audit", self.base_url, did)
    }

    fn recall(&self, did: &str) -> Option<DateTime<Utc>> {
        let known = self.known.get(did)?;
        if known.expires_at > Instant::now() {
            return Some(known.created_at);
        }
        drop(known);
        self.known.remove(did);
        None
    }

    fn remember(&self, did: &str, created_at: DateTime<Utc>) {
        if self.known.len() >= self.max_entries {
            let now = Instant::now();
            self.known.retain(|_, known| known.expires_at > now);

            // Still full: drop half, arbitrary order
            if self.known.len() >= self.max_entries {
                let excess = self.known.len() / 2 + 1;
                let victims: Vec<String> = self
                    .known
                    .iter()
                    .take(excess)
                    .map(|entry| entry.key().clone())
                    .collect();
                for key in victims {
                    self.known.remove(&key);
                }
            }
        }

        self.known.insert(
            did.to_string(),
            KnownDate {
                created_at,
                expires_at: Instant::now() + self.memo_ttl,
            },
        );
    }
}

#[async_trait]
impl AccountAge for DirectoryAccountAge {
    async fn resolve_creation_date(&self, did: &str) -> Result<Option<DateTime<Utc>>> {
        // Self-hosted identities have no audit log
        if !is_directory_did(did) {
            return Ok(None);
        }
        if let Some(created) = self.recall(did) {
            return Ok(Some(created));
        }

        let response = self
            .http_client
            .get(self.audit_url(did))
            .send()
            .await
            .map_err(|e| IndexerError::Directory(format!("audit log request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(IndexerError::Directory(format!(
                "audit log returned HTTP {}",
                response.status()
            )));
        }

        let entries: Vec<AuditEntry> = response
            .json()
            .await
            .map_err(|e| IndexerError::Directory(format!("invalid audit log: {e}")))?;

        let created = entries.iter().map(|e| e.created_at).min();
        if let Some(created) = created {
            self.remember(did, created);
            debug!(did = %did, created_at = %created, "Resolved account creation date");
        }
        Ok(created)
    }
}
