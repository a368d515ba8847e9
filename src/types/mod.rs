//! Shared types

pub mod collection;
pub mod error;
pub mod uri;

pub use collection::{SupportedCollection, TrustStatus, REACTION_NSID, TOPIC_POST_NSID, TOPIC_REPLY_NSID};
pub use error::{IndexerError, Result};
pub use uri::{RecordUri, URI_SCHEME};
