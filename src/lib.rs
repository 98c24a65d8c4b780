pub mod cli;
pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod oauth;
pub mod report;
pub mod service;

pub use config::Config;
pub use credentials::{Credential, CredentialStore};
pub use error::KeeperError;
