//! Destination store: models and schema for the credential backups table.
//!
//! Layout:
//! - `models.rs`: row struct and the JSON document kept in `data`
//! - `schema.rs`: SQL DDL (SQLite and PostgreSQL)
//! - `storage.rs`: pool selection by url and the per-pass session

pub mod models;
pub mod schema;
pub mod storage;

pub use models::{BackupDocument, RemoteRecord};
pub use schema::{POSTGRES_INIT, SQLITE_INIT};
pub use storage::{BackupSession, BackupStorage};
