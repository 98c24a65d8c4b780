//! Refresh pass: exchange every stored refresh token for a rotated one.

use crate::config::Config;
use crate::credentials::{Credential, CredentialStore};
use crate::credentials::record::REFRESH_TOKEN;
use crate::error::KeeperError;
use crate::oauth::{RefreshFailure, TokenEndpoint, TokenGrant};
use crate::report::{RefreshReport, SYSTEM_IDENTITY, write_report};
use chrono::Utc;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

pub struct Refresher {
    endpoint: TokenEndpoint,
    store_path: PathBuf,
    report_path: PathBuf,
    delay: Duration,
}

impl Refresher {
    pub fn new(
        endpoint: TokenEndpoint,
        store_path: PathBuf,
        report_path: PathBuf,
        delay: Duration,
    ) -> Self {
        Self {
            endpoint,
            store_path,
            report_path,
            delay,
        }
    }

    pub fn from_config(cfg: &Config, report_path: PathBuf) -> Result<Self, KeeperError> {
        let endpoint = TokenEndpoint::new(cfg.http_client()?, &cfg.token_url)?;
        Ok(Self::new(
            endpoint,
            cfg.accounts_file.clone(),
            report_path,
            cfg.refresh_delay(),
        ))
    }

    /// Run one pass and write the refresh report.
    ///
    /// Per-credential failures end up in the report. An `Err` means no
    /// meaningful report exists: the store could not be read (a report
    /// carrying the error is still written) or the report itself could not
    /// be written.
    pub async fn run(&self) -> Result<RefreshReport, KeeperError> {
        let mut store = match CredentialStore::load(&self.store_path) {
            Ok(store) => store,
            Err(e) => {
                error!(path = %self.store_path.display(), error = %e, "cannot read credential store");
                let report = RefreshReport::fatal(format!("cannot read credential store: {e}"));
                if let Err(write_err) = write_report(&self.report_path, &report) {
                    error!(error = %write_err, "failed to write refresh report");
                }
                return Err(e);
            }
        };

        let report = self.refresh_store(&mut store).await;
        write_report(&self.report_path, &report).inspect_err(|e| {
            error!(path = %self.report_path.display(), error = %e, "failed to write refresh report");
        })?;
        Ok(report)
    }

    async fn refresh_store(&self, store: &mut CredentialStore) -> RefreshReport {
        let mut report = RefreshReport {
            total: store.len(),
            ..RefreshReport::default()
        };
        info!(count = store.len(), "refreshing stored credentials");

        let pending: Vec<(String, Option<Credential>, Option<&'static str>)> = store
            .entries()
            .map(|(identity, entry, cred)| {
                (identity.to_string(), cred, Credential::missing_field(entry))
            })
            .collect();

        let mut changed = false;
        let mut called_provider = false;
        for (identity, cred, missing) in pending {
            let Some(cred) = cred else {
                warn!(
                    identity = %identity,
                    missing = missing.unwrap_or(REFRESH_TOKEN),
                    "skipping incomplete credential"
                );
                report.skipped += 1;
                continue;
            };

            // keep a fixed gap between provider calls to stay under rate limits
            if called_provider && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            called_provider = true;

            match self.refresh_one(&cred).await {
                Ok(new_token) => {
                    store.apply_refresh(&identity, &new_token, Utc::now());
                    changed = true;
                    report.success += 1;
                    info!(identity = %identity, "refresh token rotated");
                }
                Err(failure) => {
                    warn!(identity = %identity, reason = %failure, "refresh failed");
                    report.record_failure(identity, failure.to_string());
                }
            }
        }

        if changed {
            match store.save() {
                Ok(()) => info!(
                    path = %store.path().display(),
                    refreshed = report.success,
                    "credential store saved"
                ),
                Err(e) => {
                    error!(path = %store.path().display(), error = %e, "failed to save credential store");
                    report.record_failure(SYSTEM_IDENTITY, format!("failed to save credential store: {e}"));
                }
            }
        } else {
            info!("no credential changed; store left as is");
        }

        info!(
            total = report.total,
            success = report.success,
            failed = report.failed.len(),
            skipped = report.skipped,
            "refresh pass finished"
        );
        report
    }

    async fn refresh_one(&self, cred: &Credential) -> Result<String, RefreshFailure> {
        match self
            .endpoint
            .refresh(&cred.client_id, &cred.refresh_token)
            .await
        {
            Ok(TokenGrant {
                refresh_token: Some(token),
                ..
            }) if !token.is_empty() => Ok(token),
            Ok(_) => Err(RefreshFailure::NoTokenReturned),
            Err(e) => Err(RefreshFailure::classify(&e)),
        }
    }
}
