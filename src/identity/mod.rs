//! Identity services
//!
//! - **Directory**: upstream `did:plc` directory client
//! - **Verifier**: cached "is this identity still valid?" answers
//! - **AccountAge**: creation-date lookups for trust classification

pub mod account_age;
pub mod directory;
pub mod verifier;

pub use account_age::{trust_status_at, AccountAge, DirectoryAccountAge, NEW_ACCOUNT_WINDOW_HOURS};
pub use directory::{
    is_directory_did, DirectoryConfig, DirectoryStatus, HttpIdentityDirectory, IdentityDirectory,
    DEFAULT_DIRECTORY_URL,
};
pub use verifier::{
    is_self_hosted, CachedIdentityEntry, IdentityStatus, IdentityVerifier, InactiveReason,
    VerifierConfig, VerifierStats,
};
