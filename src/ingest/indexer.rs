//! Indexer capability consumed by the dispatcher
//!
//! One indexer per supported collection. Implementations must treat "not
//! found" as success and be idempotent under redelivery.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::types::{Result, SupportedCollection, TrustStatus};

/// A validated record to create
#[derive(Debug, Clone, PartialEq)]
pub struct CreateRecord {
    pub uri: String,
    pub rkey: String,
    pub did: String,
    pub cid: Option<String>,
    pub record: JsonValue,
    pub live: bool,
    pub trust_status: TrustStatus,
}

/// A validated record to update
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRecord {
    pub uri: String,
    pub rkey: String,
    pub did: String,
    pub cid: Option<String>,
    pub record: JsonValue,
    pub live: bool,
}

/// A record removal
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteRecord {
    pub uri: String,
    pub rkey: String,
    pub did: String,
    /// Parent or subject recovered from the local store, `None` when already gone
    pub reference_uri: Option<String>,
}

#[async_trait]
pub trait Indexer: Send + Sync {
    async fn handle_create(&self, op: CreateRecord) -> Result<()>;

    async fn handle_update(&self, op: UpdateRecord) -> Result<()>;

    async fn handle_delete(&self, op: DeleteRecord) -> Result<()>;
}

/// Indexers keyed by collection
#[derive(Clone, Default)]
pub struct IndexerSet {
    indexers: HashMap<SupportedCollection, Arc<dyn Indexer>>,
}

impl IndexerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the indexer for a collection, replacing any previous one
    pub fn with(mut self, collection: SupportedCollection, indexer: Arc<dyn Indexer>) -> Self {
        self.indexers.insert(collection, indexer);
        self
    }

    /// Register one indexer for every supported collection
    pub fn uniform(indexer: Arc<dyn Indexer>) -> Self {
        SupportedCollection::ALL
            .into_iter()
            .fold(Self::new(), |set, collection| set.with(collection, indexer.clone()))
    }

    pub fn get(&self, collection: SupportedCollection) -> Option<&Arc<dyn Indexer>> {
        self.indexers.get(&collection)
    }

    /// Collections without an indexer
    pub fn missing(&self) -> Vec<SupportedCollection> {
        SupportedCollection::ALL
            .into_iter()
            .filter(|c| !self.indexers.contains_key(c))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopIndexer;

    #[async_trait]
    impl Indexer for NoopIndexer {
        async fn handle_create(&self, _op: CreateRecord) -> Result<()> {
            Ok(())
        }

        async fn handle_update(&self, _op: UpdateRecord) -> Result<()> {
            Ok(())
        }

        async fn handle_delete(&self, _op: DeleteRecord) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_missing_collections() {
        let set = IndexerSet::new().with(SupportedCollection::TopicReply, Arc::new(NoopIndexer));
        assert_eq!(
            set.missing(),
            vec![SupportedCollection::TopicPost, SupportedCollection::Reaction]
        );
        assert!(set.get(SupportedCollection::TopicReply).is_some());

        assert!(IndexerSet::uniform(Arc::new(NoopIndexer)).missing().is_empty());
    }
}
