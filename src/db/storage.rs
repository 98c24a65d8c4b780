use crate::db::models::RemoteRecord;
use crate::db::schema::{POSTGRES_INIT, SQLITE_INIT};
use crate::error::KeeperError;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Postgres, Sqlite};
use std::str::FromStr;
use std::time::Duration;

pub type SqlitePool = Pool<Sqlite>;
pub type PgPool = Pool<Postgres>;

/// Destination store for credential backups, selected by url scheme.
#[derive(Clone)]
pub enum BackupStorage {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

impl BackupStorage {
    pub async fn connect(database_url: &str) -> Result<Self, KeeperError> {
        if database_url.starts_with("sqlite:") {
            let connect_opts =
                SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .acquire_timeout(Duration::from_secs(10))
                .connect_with(connect_opts)
                .await?;
            Ok(Self::Sqlite(pool))
        } else if database_url.starts_with("postgres://")
            || database_url.starts_with("postgresql://")
        {
            let pool = PgPoolOptions::new()
                .max_connections(1)
                .acquire_timeout(Duration::from_secs(10))
                .connect(database_url)
                .await?;
            Ok(Self::Postgres(pool))
        } else {
            let scheme = database_url.split(':').next().unwrap_or_default();
            Err(KeeperError::UnsupportedDatabase(scheme.to_string()))
        }
    }

    /// Create the backup table if it does not exist yet.
    pub async fn init_schema(&self) -> Result<(), KeeperError> {
        let ddl = match self {
            Self::Sqlite(_) => SQLITE_INIT,
            Self::Postgres(_) => POSTGRES_INIT,
        };
        // execute statements one by one; sqlx::query takes a single statement
        for stmt in ddl.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            match self {
                Self::Sqlite(pool) => {
                    sqlx::query(s).execute(pool).await?;
                }
                Self::Postgres(pool) => {
                    sqlx::query(s).execute(pool).await?;
                }
            }
        }
        Ok(())
    }

    /// Check out the single connection used for a whole reconciliation pass.
    pub async fn session(&self) -> Result<BackupSession, KeeperError> {
        Ok(match self {
            Self::Sqlite(pool) => BackupSession::Sqlite(pool.acquire().await?),
            Self::Postgres(pool) => BackupSession::Postgres(pool.acquire().await?),
        })
    }

    pub async fn close(&self) {
        match self {
            Self::Sqlite(pool) => pool.close().await,
            Self::Postgres(pool) => pool.close().await,
        }
    }
}

/// One checked-out connection. Every statement commits on its own; rows are
/// independent, so no transaction spans the pass.
pub enum BackupSession {
    Sqlite(PoolConnection<Sqlite>),
    Postgres(PoolConnection<Postgres>),
}

impl BackupSession {
    /// Point lookup by case-folded email.
    pub async fn find(&mut self, email: &str) -> Result<Option<RemoteRecord>, KeeperError> {
        let row = match self {
            Self::Sqlite(conn) => {
                sqlx::query_as::<_, RemoteRecord>(
                    "SELECT email, data FROM account_backups WHERE LOWER(email) = LOWER(?) LIMIT 1",
                )
                .bind(email)
                .fetch_optional(&mut **conn)
                .await?
            }
            Self::Postgres(conn) => {
                sqlx::query_as::<_, RemoteRecord>(
                    "SELECT email, data FROM account_backups WHERE LOWER(email) = LOWER($1) LIMIT 1",
                )
                .bind(email)
                .fetch_optional(&mut **conn)
                .await?
            }
        };
        Ok(row)
    }

    pub async fn insert(
        &mut self,
        email: &str,
        data: &str,
        at: DateTime<Utc>,
    ) -> Result<(), KeeperError> {
        match self {
            Self::Sqlite(conn) => {
                sqlx::query(
                    "INSERT INTO account_backups (email, data, last_modified_at) VALUES (?, ?, ?)",
                )
                .bind(email)
                .bind(data)
                .bind(at.to_rfc3339())
                .execute(&mut **conn)
                .await?;
            }
            Self::Postgres(conn) => {
                sqlx::query(
                    "INSERT INTO account_backups (email, data, last_modified_at) VALUES ($1, $2, $3)",
                )
                .bind(email)
                .bind(data)
                .bind(at)
                .execute(&mut **conn)
                .await?;
            }
        }
        Ok(())
    }

    /// Update by the email exactly as the store recorded it.
    pub async fn update(
        &mut self,
        stored_email: &str,
        data: &str,
        at: DateTime<Utc>,
    ) -> Result<(), KeeperError> {
        match self {
            Self::Sqlite(conn) => {
                sqlx::query("UPDATE account_backups SET data = ?, last_modified_at = ? WHERE email = ?")
                    .bind(data)
                    .bind(at.to_rfc3339())
                    .bind(stored_email)
                    .execute(&mut **conn)
                    .await?;
            }
            Self::Postgres(conn) => {
                sqlx::query(
                    "UPDATE account_backups SET data = $1, last_modified_at = $2 WHERE email = $3",
                )
                .bind(data)
                .bind(at)
                .bind(stored_email)
                .execute(&mut **conn)
                .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn sqlite_storage(dir: &TempDir) -> BackupStorage {
        let url = format!("sqlite:{}", dir.path().join("backups.db").display());
        let storage = BackupStorage::connect(&url).await.expect("connect");
        storage.init_schema().await.expect("schema");
        storage
    }

    #[tokio::test]
    async fn lookup_is_case_insensitive_and_returns_stored_casing() {
        let dir = TempDir::new().unwrap();
        let storage = sqlite_storage(&dir).await;
        let mut session = storage.session().await.unwrap();

        session
            .insert("Foo@Bar.com", r#"{"refresh_token":"a"}"#, Utc::now())
            .await
            .unwrap();
        let found = session.find("foo@bar.COM").await.unwrap().expect("row");
        assert_eq!(found.email, "Foo@Bar.com");

        session
            .update(&found.email, r#"{"refresh_token":"b"}"#, Utc::now())
            .await
            .unwrap();
        let found = session.find("FOO@BAR.COM").await.unwrap().expect("row");
        assert_eq!(found.data, r#"{"refresh_token":"b"}"#);
        assert!(session.find("other@bar.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn schema_init_is_idempotent_and_rejects_case_duplicates() {
        let dir = TempDir::new().unwrap();
        let storage = sqlite_storage(&dir).await;
        storage.init_schema().await.expect("second init");

        let mut session = storage.session().await.unwrap();
        session.insert("a@b.com", "{}", Utc::now()).await.unwrap();
        assert!(session.insert("A@B.com", "{}", Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn unknown_scheme_is_rejected() {
        let err = BackupStorage::connect("mysql://localhost/db").await.err().unwrap();
        assert!(matches!(err, KeeperError::UnsupportedDatabase(s) if s == "mysql"));
    }
}
