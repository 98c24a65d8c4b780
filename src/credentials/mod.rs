//! Local credential store.
//!
//! - `record.rs`: field names, completeness rules and identity matching
//! - `store.rs`: the whole-file JSON store

pub mod record;
pub mod store;

pub use record::{Credential, CredentialStatus, identity_eq};
pub use store::CredentialStore;
