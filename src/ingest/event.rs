//! Record events as delivered by the firehose relay

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::types::{RecordUri, SupportedCollection};

/// Repository operation carried by an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordAction {
    Create,
    Update,
    Delete,
}

impl RecordAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// A single record change from a user repository.
///
/// `collection` stays a raw NSID so events for unrelated lexicons still
/// decode; the dispatcher gates on it. The payload is expected on creates
/// and updates only, but upstream is untrusted so that is checked at
/// dispatch time rather than encoded in the type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordEvent {
    /// Stream sequence identifier
    pub id: u64,
    /// Collection NSID
    pub collection: String,
    pub action: RecordAction,
    /// Authoring repository DID
    #[serde(alias = "identity")]
    pub did: String,
    #[serde(alias = "recordKey")]
    pub rkey: String,
    /// Record body (absent on delete)
    #[serde(default, alias = "payload", skip_serializing_if = "Option::is_none")]
    pub record: Option<JsonValue>,
    /// Content hash of the record block
    #[serde(default, alias = "contentHash", skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    /// True for live-tail events, false during backfill
    #[serde(default, alias = "isLive")]
    pub live: bool,
}

impl RecordEvent {
    /// The supported collection this event belongs to, if any
    pub fn supported_collection(&self) -> Option<SupportedCollection> {
        SupportedCollection::from_nsid(&self.collection)
    }

    /// Canonical URI, when the collection is supported
    pub fn uri(&self) -> Option<RecordUri> {
        self.supported_collection()
            .map(|collection| RecordUri::new(&self.did, collection, &self.rkey))
    }
}
