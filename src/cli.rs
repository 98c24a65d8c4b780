//! Command tree for the `keeper` binary.
//!
//! `keeper run` is the long-running scheduler. `refresh` and `sync` are the
//! entry points the scheduler re-invokes as child processes; they are also
//! handy by hand.

use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::error::KeeperError;
use crate::oauth::{RefreshFailure, TokenEndpoint};
use crate::report::ReportPaths;
use crate::service::notifier::Notifier;
use crate::service::reconciler::Reconciler;
use crate::service::refresher::Refresher;
use crate::service::reporter::Reporter;
use crate::service::scheduler::{Scheduler, listen_for_shutdown};
use crate::service::steps::ProcessRunner;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "keeper",
    version,
    about = "Keeps OAuth refresh tokens alive and backs them up to a database"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the scheduler: refresh, sync and report every cycle until stopped.
    Run,

    /// Run exactly one cycle, then exit.
    Once,

    /// Refresh every stored credential and write the refresh report.
    Refresh,

    /// Replicate the credential store into the database and write the sync report.
    Sync,

    /// Send the summary notification for the latest reports.
    Notify,

    /// Check a refresh token against the token endpoint without storing anything.
    Verify {
        #[arg(long)]
        client_id: String,
        #[arg(long)]
        refresh_token: String,
    },

    /// Store a credential obtained through the authorization flow.
    Add {
        /// Account identity (email); matched case-insensitively.
        identity: String,
        #[arg(long)]
        client_id: String,
        #[arg(long)]
        refresh_token: String,
        /// Exchange the token once first and store the rotated one.
        #[arg(long)]
        verify: bool,
    },
}

impl Cli {
    pub async fn execute(self, cfg: &Config) -> Result<ExitCode, KeeperError> {
        let paths = ReportPaths::in_dir(&cfg.logs_dir);
        match self.command.unwrap_or(Commands::Run) {
            Commands::Run => {
                let mut scheduler = build_scheduler(cfg, paths)?;
                scheduler.run().await;
                Ok(ExitCode::SUCCESS)
            }
            Commands::Once => {
                let mut scheduler = build_scheduler(cfg, paths)?;
                scheduler.run_once().await;
                Ok(ExitCode::SUCCESS)
            }
            Commands::Refresh => {
                let refresher = Refresher::from_config(cfg, paths.refresh)?;
                Ok(match refresher.run().await {
                    Ok(_) => ExitCode::SUCCESS,
                    Err(_) => ExitCode::FAILURE,
                })
            }
            Commands::Sync => {
                Reconciler::from_config(cfg, paths.sync).run().await?;
                Ok(ExitCode::SUCCESS)
            }
            Commands::Notify => {
                let reporter = Reporter::new(paths, Notifier::from_config(cfg)?, &cfg.project_name);
                reporter.report().await;
                Ok(ExitCode::SUCCESS)
            }
            Commands::Verify {
                client_id,
                refresh_token,
            } => verify(cfg, &client_id, &refresh_token).await,
            Commands::Add {
                identity,
                client_id,
                refresh_token,
                verify,
            } => add(cfg, &identity, &client_id, refresh_token, verify).await,
        }
    }
}

fn build_scheduler(
    cfg: &Config,
    paths: ReportPaths,
) -> Result<Scheduler<ProcessRunner>, KeeperError> {
    let reporter = Reporter::new(paths, Notifier::from_config(cfg)?, &cfg.project_name);
    let runner = ProcessRunner::current_exe(reporter)?;
    let shutdown = CancellationToken::new();
    listen_for_shutdown(shutdown.clone());
    info!(pid = std::process::id(), "credential keeper starting");
    Ok(Scheduler::new(runner, cfg.cycle_interval(), shutdown))
}

async fn verify(cfg: &Config, client_id: &str, refresh_token: &str) -> Result<ExitCode, KeeperError> {
    let endpoint = TokenEndpoint::new(cfg.http_client()?, &cfg.token_url)?;
    println!("Checking refresh token with client id {client_id}");
    match endpoint.refresh(client_id, refresh_token).await {
        Ok(grant) => {
            println!("Token is valid.");
            println!("Access token:  {}...", prefix(&grant.access_token));
            match grant.refresh_token.as_deref() {
                Some(rt) => println!("Refresh token: {}...", prefix(rt)),
                None => println!("Refresh token: {}", RefreshFailure::NoTokenReturned),
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("Token check failed: {}", RefreshFailure::classify(&e));
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn add(
    cfg: &Config,
    identity: &str,
    client_id: &str,
    refresh_token: String,
    verify: bool,
) -> Result<ExitCode, KeeperError> {
    let mut token = refresh_token;
    if verify {
        let endpoint = TokenEndpoint::new(cfg.http_client()?, &cfg.token_url)?;
        match endpoint.refresh(client_id, &token).await {
            Ok(grant) => match grant.refresh_token {
                Some(rotated) => token = rotated,
                None => info!("provider kept the refresh token; storing it as given"),
            },
            Err(e) => {
                error!(identity, reason = %RefreshFailure::classify(&e), "token check failed; nothing stored");
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    let mut store = CredentialStore::load_or_default(&cfg.accounts_file)?;
    let key = store.save_authorized(identity, &token, client_id, Utc::now());
    store.save()?;
    println!("Stored credential for {key} in {}", store.path().display());
    Ok(ExitCode::SUCCESS)
}

fn prefix(secret: &str) -> &str {
    match secret.char_indices().nth(30) {
        Some((idx, _)) => &secret[..idx],
        None => secret,
    }
}
