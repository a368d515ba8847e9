//! Supported record collections and their indexer capabilities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// NSID of a forum topic post
pub const TOPIC_POST_NSID: &str = "forum.barazo.topic.post";

/// NSID of a reply to a topic
pub const TOPIC_REPLY_NSID: &str = "forum.barazo.topic.reply";

/// NSID of a reaction to a topic or reply
pub const REACTION_NSID: &str = "forum.barazo.interaction.reaction";

/// Closed set of record collections this service indexes.
///
/// Anything else on the shared stream is ignored by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SupportedCollection {
    TopicPost,
    TopicReply,
    Reaction,
}

impl SupportedCollection {
    /// All supported collections
    pub const ALL: [SupportedCollection; 3] = [
        SupportedCollection::TopicPost,
        SupportedCollection::TopicReply,
        SupportedCollection::Reaction,
    ];

    /// Collection NSID as it appears on the wire and in URIs
    pub fn nsid(&self) -> &'static str {
        match self {
            Self::TopicPost => TOPIC_POST_NSID,
            Self::TopicReply => TOPIC_REPLY_NSID,
            Self::Reaction => REACTION_NSID,
        }
    }

    /// Name of the indexer capability that owns this collection
    pub fn indexer_name(&self) -> &'static str {
        match self {
            Self::TopicPost => "topic",
            Self::TopicReply => "reply",
            Self::Reaction => "reaction",
        }
    }

    /// Look up a collection by NSID
    pub fn from_nsid(nsid: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.nsid() == nsid)
    }
}

impl fmt::Display for SupportedCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.nsid())
    }
}

impl FromStr for SupportedCollection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_nsid(s).ok_or_else(|| format!("unsupported collection: {s}"))
    }
}

impl TryFrom<String> for SupportedCollection {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SupportedCollection> for String {
    fn from(value: SupportedCollection) -> Self {
        value.nsid().to_string()
    }
}

/// Trust classification of an author at the moment of a create event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrustStatus {
    /// Account younger than the new-account window
    New,
    /// Established account, or age unknown
    #[default]
    Trusted,
}

impl TrustStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Trusted => "trusted",
        }
    }
}

impl fmt::Display for TrustStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
