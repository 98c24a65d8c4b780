//! Sync pass: replicate the local credential store into the backup table.

use crate::config::Config;
use crate::credentials::{Credential, CredentialStore};
use crate::db::{BackupDocument, BackupSession, BackupStorage};
use crate::error::KeeperError;
use crate::report::{SyncReport, SyncStats, write_report};
use backon::{ExponentialBuilder, Retryable};
use chrono::Utc;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What happened to one credential during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Inserted,
    Updated,
    Unchanged,
}

fn connect_retry_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(3))
        .with_max_times(3)
        .with_jitter()
}

pub struct Reconciler {
    store_path: PathBuf,
    report_path: PathBuf,
    database_url: Option<String>,
}

impl Reconciler {
    pub fn new(store_path: PathBuf, report_path: PathBuf, database_url: Option<String>) -> Self {
        Self {
            store_path,
            report_path,
            database_url,
        }
    }

    pub fn from_config(cfg: &Config, report_path: PathBuf) -> Self {
        Self::new(
            cfg.accounts_file.clone(),
            report_path,
            cfg.db_url().map(str::to_string),
        )
    }

    /// Run one pass and write the sync report. `Err` only when the report
    /// could not be written.
    pub async fn run(&self) -> Result<SyncReport, KeeperError> {
        let report = self.reconcile().await;
        if let Some(err) = report.error.as_deref() {
            warn!(error = err, "sync pass ended with an error");
        }
        write_report(&self.report_path, &report).inspect_err(|e| {
            error!(path = %self.report_path.display(), error = %e, "failed to write sync report");
        })?;
        Ok(report)
    }

    async fn reconcile(&self) -> SyncReport {
        let Some(database_url) = self.database_url.as_deref() else {
            return SyncReport::fatal("DB_URL is not configured");
        };

        let store = match CredentialStore::load(&self.store_path) {
            Ok(store) if !store.is_empty() => store,
            Ok(_) => return SyncReport::fatal("no local credential data"),
            Err(e) => return SyncReport::fatal(format!("no local credential data: {e}")),
        };

        let storage = match (|| async { BackupStorage::connect(database_url).await })
            .retry(connect_retry_policy())
            .when(|e: &KeeperError| e.is_retryable())
            .notify(|err, dur: Duration| {
                warn!("database connect retrying after error {}, sleeping {:?}", err, dur);
            })
            .await
        {
            Ok(storage) => storage,
            Err(e) => return SyncReport::fatal(format!("database connection failed: {e}")),
        };

        let report = self.reconcile_with(&storage, &store).await;
        storage.close().await;
        report
    }

    async fn reconcile_with(&self, storage: &BackupStorage, store: &CredentialStore) -> SyncReport {
        if let Err(e) = storage.init_schema().await {
            return SyncReport::fatal(format!("database schema check failed: {e}"));
        }
        let mut session = match storage.session().await {
            Ok(session) => session,
            Err(e) => return SyncReport::fatal(format!("database connection failed: {e}")),
        };

        info!(count = store.len(), "syncing local credentials to database");
        let mut stats = SyncStats::default();
        let mut error = None;
        for (identity, _, cred) in store.entries() {
            let Some(cred) = cred else {
                debug!(identity, "skipping incomplete credential");
                continue;
            };
            match reconcile_one(&mut session, &cred).await {
                Ok(SyncAction::Inserted) => {
                    info!(identity, "backup inserted");
                    stats.inserted += 1;
                }
                Ok(SyncAction::Updated) => stats.updated += 1,
                Ok(SyncAction::Unchanged) => stats.skipped += 1,
                Err(e) => {
                    // counts gathered so far stay valid; every write commits on its own
                    error!(identity, error = %e, "database operation failed; stopping sync");
                    error = Some(format!("database operation failed at {identity}: {e}"));
                    break;
                }
            }
        }

        info!(
            inserted = stats.inserted,
            updated = stats.updated,
            skipped = stats.skipped,
            "sync pass finished"
        );
        SyncReport { stats, error }
    }
}

/// Insert, merge-update or leave alone the remote row for one credential.
pub async fn reconcile_one(
    session: &mut BackupSession,
    cred: &Credential,
) -> Result<SyncAction, KeeperError> {
    let Some(existing) = session.find(&cred.identity).await? else {
        let doc = BackupDocument::for_credential(cred);
        session
            .insert(&cred.identity, &doc.encode()?, Utc::now())
            .await?;
        return Ok(SyncAction::Inserted);
    };

    let mut doc = BackupDocument::decode(&existing.data);
    if !doc.merge_credential(cred) {
        return Ok(SyncAction::Unchanged);
    }
    session
        .update(&existing.email, &doc.encode()?, Utc::now())
        .await?;
    info!(
        stored = %existing.email,
        local = %cred.identity,
        "backup updated"
    );
    Ok(SyncAction::Updated)
}
