//! Canonical content URIs
//!
//! Every indexer joins on `at://<did>/<collection>/<rkey>`. A delete event
//! carries the three parts, but not the parent or subject the record pointed
//! at, which is why deletes need a compensating lookup.

use std::fmt;

use super::collection::SupportedCollection;

/// URI scheme for repository records
pub const URI_SCHEME: &str = "at";

/// Canonical record URI
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordUri {
    pub did: String,
    pub collection: SupportedCollection,
    pub record_key: String,
}

impl RecordUri {
    pub fn new(did: &str, collection: SupportedCollection, record_key: &str) -> Self {
        Self {
            did: did.to_string(),
            collection,
            record_key: record_key.to_string(),
        }
    }

    /// Parse an `at://did/collection/rkey` string.
    ///
    /// Returns `None` for other schemes, unsupported collections or a
    /// wrong number of path segments.
    pub fn parse(uri: &str) -> Option<Self> {
        let rest = uri.strip_prefix("at://")?;
        let mut parts = rest.splitn(3, '/');
        let did = parts.next().filter(|s| s.starts_with("did:"))?;
        let collection = SupportedCollection::from_nsid(parts.next()?)?;
        let record_key = parts.next().filter(|s| !s.is_empty() && !s.contains('/'))?;
        Some(Self::new(did, collection, record_key))
    }
}

impl fmt::Display for RecordUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}/{}/{}",
            URI_SCHEME,
            self.did,
            self.collection.nsid(),
            self.record_key
        )
    }
}
