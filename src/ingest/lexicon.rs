//! Lexicon record shapes for forum collections
//!
//! Each collection's schema is a `RecordSchema` capability so the validator
//! stays polymorphic. The bundled schemas check structure by decoding into
//! typed records and then applying field limits.

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::types::SupportedCollection;

/// Structural check for one collection's documents
pub trait RecordSchema: Send + Sync {
    /// Check a document against the collection shape
    fn check(&self, document: &JsonValue) -> Result<(), String>;
}

pub const MAX_TITLE_CHARS: usize = 300;
pub const MAX_CONTENT_CHARS: usize = 100_000;
pub const MAX_TAGS: usize = 5;
pub const MAX_TAG_CHARS: usize = 30;
pub const MAX_REACTION_TYPE_CHARS: usize = 300;

/// Reference to another record by URI and content hash
#[derive(Debug, Clone, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    pub cid: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicPostRecord {
    pub title: String,
    pub content: String,
    pub community: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicReplyRecord {
    pub content: String,
    pub root: StrongRef,
    pub parent: StrongRef,
    pub community: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionRecord {
    pub subject: StrongRef,
    #[serde(rename = "type")]
    pub reaction_type: String,
    pub community: String,
    pub created_at: String,
}

fn decode<T: for<'de> Deserialize<'de>>(document: &JsonValue) -> Result<T, String> {
    T::deserialize(document).map_err(|e| e.to_string())
}

fn check_len(field: &str, value: &str, min: usize, max: usize) -> Result<(), String> {
    let len = value.chars().count();
    if len < min {
        return Err(format!("{field} must be at least {min} characters"));
    }
    if len > max {
        return Err(format!("{field} must be at most {max} characters"));
    }
    Ok(())
}

fn check_datetime(field: &str, value: &str) -> Result<(), String> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|_| ())
        .map_err(|_| format!("{field} must be an RFC 3339 datetime"))
}

fn check_did(field: &str, value: &str) -> Result<(), String> {
    if value.starts_with("did:") && value.len() > 4 {
        Ok(())
    } else {
        Err(format!("{field} must be a DID"))
    }
}

fn check_strong_ref(field: &str, reference: &StrongRef) -> Result<(), String> {
    if !reference.uri.starts_with("at://") {
        return Err(format!("{field}.uri must be an at:// URI"));
    }
    if reference.cid.is_empty() {
        return Err(format!("{field}.cid must not be empty"));
    }
    Ok(())
}

/// `forum.barazo.topic.post`
pub struct TopicPostSchema;

impl RecordSchema for TopicPostSchema {
    fn check(&self, document: &JsonValue) -> Result<(), String> {
        let record: TopicPostRecord = decode(document)?;
        check_len("title", &record.title, 1, MAX_TITLE_CHARS)?;
        check_len("content", &record.content, 0, MAX_CONTENT_CHARS)?;
        check_did("community", &record.community)?;
        if record.tags.len() > MAX_TAGS {
            return Err(format!("tags must have at most {MAX_TAGS} entries"));
        }
        for tag in &record.tags {
            check_len("tag", tag, 1, MAX_TAG_CHARS)?;
        }
        check_datetime("createdAt", &record.created_at)
    }
}

/// `forum.barazo.topic.reply`
pub struct TopicReplySchema;

impl RecordSchema for TopicReplySchema {
    fn check(&self, document: &JsonValue) -> Result<(), String> {
        let record: TopicReplyRecord = decode(document)?;
        check_len("content", &record.content, 1, MAX_CONTENT_CHARS)?;
        check_strong_ref("root", &record.root)?;
        check_strong_ref("parent", &record.parent)?;
        check_did("community", &record.community)?;
        check_datetime("createdAt", &record.created_at)
    }
}

/// `forum.barazo.interaction.reaction`
pub struct ReactionSchema;

impl RecordSchema for ReactionSchema {
    fn check(&self, document: &JsonValue) -> Result<(), String> {
        let record: ReactionRecord = decode(document)?;
        check_strong_ref("subject", &record.subject)?;
        check_len("type", &record.reaction_type, 1, MAX_REACTION_TYPE_CHARS)?;
        check_did("community", &record.community)?;
        check_datetime("createdAt", &record.created_at)
    }
}

/// Bundled schema for a collection
pub fn schema_for(collection: SupportedCollection) -> Box<dyn RecordSchema> {
    match collection {
        SupportedCollection::TopicPost => Box::new(TopicPostSchema),
        SupportedCollection::TopicReply => Box::new(TopicReplySchema),
        SupportedCollection::Reaction => Box::new(ReactionSchema),
    }
}
