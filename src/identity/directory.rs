//! Upstream identity directory client
//!
//! Resolves `did:plc` identities against the central directory. Status
//! mapping: 200 found, 410 tombstoned, 404 not found. Anything else is an
//! error for the caller to interpret.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use crate::types::{IndexerError, Result};

/// Default directory endpoint
pub const DEFAULT_DIRECTORY_URL: &str = "https://plc.directory";

/// Default request timeout for directory calls
pub const DEFAULT_DIRECTORY_TIMEOUT: Duration = Duration::from_secs(5);

/// Definitive directory answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryStatus {
    /// Identity document present
    Found,
    /// Identity permanently removed
    Tombstoned,
    /// Directory has never heard of the identity
    NotFound,
}

/// Directory capability. Non-definitive outcomes are returned as errors.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn resolve(&self, did: &str) -> Result<DirectoryStatus>;
}

/// Map an HTTP status from the directory to a definitive answer
pub fn status_from_http(status: StatusCode) -> Option<DirectoryStatus> {
    match status {
        s if s.is_success() => Some(DirectoryStatus::Found),
        StatusCode::GONE => Some(DirectoryStatus::Tombstoned),
        StatusCode::NOT_FOUND => Some(DirectoryStatus::NotFound),
        _ => None,
    }
}

/// Whether a DID is a well-formed `did:plc` identifier (base32 lowercase)
pub fn is_directory_did(did: &str) -> bool {
    did.strip_prefix("did:plc:")
        .map(|id| !id.is_empty() && id.chars().all(|c| matches!(c, 'a'..='z' | '2'..='7')))
        .unwrap_or(false)
}

/// Configuration for the HTTP directory client
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Base URL, without trailing slash
    pub base_url: String,
    /// Timeout for each request
    pub request_timeout: Duration,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_DIRECTORY_URL.to_string(),
            request_timeout: DEFAULT_DIRECTORY_TIMEOUT,
        }
    }
}

/// HTTP client for the identity directory
pub struct HttpIdentityDirectory {
    config: DirectoryConfig,
    http_client: reqwest::Client,
}

impl HttpIdentityDirectory {
    pub fn new(config: DirectoryConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("forum-indexer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IndexerError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Shared HTTP client, reused by other directory consumers
    pub fn http_client(&self) -> reqwest::Client {
        self.http_client.clone()
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn document_url(&self, did: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), did)
    }
}

#[async_trait]
impl IdentityDirectory for HttpIdentityDirectory {
    async fn resolve(&self, did: &str) -> Result<DirectoryStatus> {
        if !is_directory_did(did) {
            return Err(IndexerError::Directory(format!("not a directory DID: {did}")));
        }
        let url = self.document_url(did);
        debug!(did = %did, url = %url, "Resolving identity");

        let response = self
            .http_client
            .get(&url)
            .header("Accept", "application/did+ld+json, application/json")
            .send()
            .await
            .map_err(|e| IndexerError::Directory(format!("request failed: {e}")))?;

        let status = response.status();
        status_from_http(status)
            .ok_or_else(|| IndexerError::Directory(format!("unexpected HTTP {} from {}", status, url)))
    }
}
