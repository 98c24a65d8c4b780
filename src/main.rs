use clap::Parser;
use credential_keeper::{cli::Cli, config::Config};
use mimalloc::MiMalloc;
use std::process::ExitCode;
use tracing::{debug, error};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let cfg = Config::load()?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    debug!(
        accounts_file = %cfg.accounts_file.display(),
        logs_dir = %cfg.logs_dir.display(),
        token_url = %cfg.token_url,
        db_configured = cfg.db_url().is_some(),
        notify_configured = cfg.notify_api_url().is_some(),
        proxy = %cfg.proxy.as_ref().map(|u| u.as_str()).unwrap_or("<none>"),
        loglevel = %cfg.loglevel,
    );

    match cli.execute(&cfg).await {
        Ok(code) => Ok(code),
        Err(e) => {
            error!(error = %e, "command failed");
            Ok(ExitCode::FAILURE)
        }
    }
}
