//! Record validation
//!
//! Runs three checks in order and stops at the first failure: collection
//! membership, serialized size, then the collection's structural schema.
//! Purely computational; safe to share across tasks.

use std::collections::HashMap;

use serde_json::Value as JsonValue;

use super::lexicon::{schema_for, RecordSchema};
use crate::types::SupportedCollection;

/// Maximum canonical serialized size of a record (64 KiB)
pub const MAX_RECORD_BYTES: usize = 64 * 1024;

/// Outcome of validating one document
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    Success { data: JsonValue },
    Failure { error: String },
}

impl ValidationResult {
    fn failure(error: impl Into<String>) -> Self {
        Self::Failure { error: error.into() }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Validator holding one schema per supported collection
pub struct RecordValidator {
    schemas: HashMap<SupportedCollection, Box<dyn RecordSchema>>,
    max_record_bytes: usize,
}

impl RecordValidator {
    /// Validator using the bundled lexicon schemas
    pub fn new() -> Self {
        let schemas = SupportedCollection::ALL
            .into_iter()
            .map(|collection| (collection, schema_for(collection)))
            .collect();
        Self {
            schemas,
            max_record_bytes: MAX_RECORD_BYTES,
        }
    }

    /// Replace the schema used for one collection
    pub fn with_schema(mut self, collection: SupportedCollection, schema: Box<dyn RecordSchema>) -> Self {
        self.schemas.insert(collection, schema);
        self
    }

    /// Validate a raw document for the named collection.
    ///
    /// On success the document is returned unchanged.
    pub fn validate(&self, collection: &str, document: &JsonValue) -> ValidationResult {
        let Some(collection) = SupportedCollection::from_nsid(collection) else {
            return ValidationResult::failure(format!("unsupported collection: {collection}"));
        };

        // Size first: cheap rejection of abuse regardless of structure
        let size = match serde_json::to_vec(document) {
            Ok(bytes) => bytes.len(),
            Err(e) => return ValidationResult::failure(format!("unserializable record: {e}")),
        };
        if size > self.max_record_bytes {
            return ValidationResult::failure(format!(
                "record exceeds maximum size: {} > {} bytes",
                size, self.max_record_bytes
            ));
        }

        let Some(schema) = self.schemas.get(&collection) else {
            return ValidationResult::failure(format!("no schema registered for {collection}"));
        };

        match schema.check(document) {
            Ok(()) => ValidationResult::Success {
                data: document.clone(),
            },
            Err(error) => ValidationResult::failure(format!("invalid {collection}: {error}")),
        }
    }
}

impl Default for RecordValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Schema that accepts everything and counts invocations
    struct CountingSchema(Arc<AtomicUsize>);

    impl RecordSchema for CountingSchema {
        fn check(&self, _document: &JsonValue) -> Result<(), String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn valid_post(content: String) -> JsonValue {
        json!({
            "title": "Large topic",
            "content": content,
            "community": "did:plc:community",
            "createdAt": "2025-03-01T12:00:00Z"
        })
    }

    #[test]
    fn test_unsupported_collection() {
        let validator = RecordValidator::new();
        let result = validator.validate("app.bsky.feed.post", &json!({}));
        assert_eq!(
            result,
            ValidationResult::Failure {
                error: "unsupported collection: app.bsky.feed.post".to_string()
            }
        );
    }

    #[test]
    fn test_valid_document_returned_unchanged() {
        let validator = RecordValidator::new();
        let doc = valid_post("hello".to_string());
        match validator.validate("forum.barazo.topic.post", &doc) {
            ValidationResult::Success { data } => assert_eq!(data, doc),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn test_oversized_rejected_before_schema() {
        let calls = Arc::new(AtomicUsize::new(0));
        let validator = RecordValidator::new().with_schema(
            SupportedCollection::TopicPost,
            Box::new(CountingSchema(calls.clone())),
        );

        // 70 KiB of content, otherwise a valid post
        let doc = valid_post("x".repeat(70 * 1024));
        let result = validator.validate("forum.barazo.topic.post", &doc);

        match result {
            ValidationResult::Failure { error } => {
                assert!(error.starts_with("record exceeds maximum size"), "{error}")
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_schema_runs_for_small_documents() {
        let calls = Arc::new(AtomicUsize::new(0));
        let validator = RecordValidator::new().with_schema(
            SupportedCollection::Reaction,
            Box::new(CountingSchema(calls.clone())),
        );

        assert!(validator
            .validate("forum.barazo.interaction.reaction", &json!({"anything": 1}))
            .is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_schema_mismatch() {
        let validator = RecordValidator::new();
        let result = validator.validate("forum.barazo.topic.reply", &json!({"content": 5}));
        match result {
            ValidationResult::Failure { error } => {
                assert!(error.starts_with("invalid forum.barazo.topic.reply"), "{error}")
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
