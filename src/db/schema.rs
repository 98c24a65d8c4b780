//! SQL DDL for the destination backup table.
//!
//! One row per account, unique on the case-folded email. The stored email
//! keeps the casing it was first written with.

/// SQLite schema:
/// - `email` TEXT UNIQUE COLLATE NOCASE (case-insensitive uniqueness)
/// - `data` JSON document serialized as text
/// - `last_modified_at` RFC3339 text
pub const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS account_backups (
    email TEXT NOT NULL UNIQUE COLLATE NOCASE,
    data TEXT NOT NULL,
    last_modified_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_account_backups_email_lower ON account_backups(LOWER(email));
"#;

/// PostgreSQL schema; uniqueness is enforced by an expression index.
pub const POSTGRES_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS account_backups (
    email TEXT NOT NULL,
    data TEXT NOT NULL,
    last_modified_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_account_backups_email_lower ON account_backups (LOWER(email));
"#;
