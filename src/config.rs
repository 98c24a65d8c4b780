//! Runtime configuration.
//!
//! Values come from the process environment (after `.env` has been loaded by
//! `main`) layered over [`Config::default`]. Variable names are the
//! upper-cased field names, e.g. `DB_URL`, `NOTIFY_API_URL`, `LOGLEVEL`.

use crate::error::KeeperError;
use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";

const ENV_KEYS: &[&str] = &[
    "loglevel",
    "accounts_file",
    "logs_dir",
    "token_url",
    "db_url",
    "notify_api_url",
    "notify_key",
    "project_name",
    "refresh_delay_ms",
    "cycle_interval_secs",
    "http_timeout_secs",
    "proxy",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub loglevel: String,
    /// Local credential store.
    pub accounts_file: PathBuf,
    /// Directory holding the per-cycle report documents.
    pub logs_dir: PathBuf,
    pub token_url: Url,
    /// Destination store; `sqlite:` or `postgres://` urls.
    pub db_url: Option<String>,
    pub notify_api_url: Option<String>,
    pub notify_key: Option<String>,
    pub project_name: String,
    /// Pause between two consecutive token exchanges.
    pub refresh_delay_ms: u64,
    pub cycle_interval_secs: u64,
    pub http_timeout_secs: u64,
    pub proxy: Option<Url>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            loglevel: "info".to_string(),
            accounts_file: PathBuf::from("accounts.json"),
            logs_dir: PathBuf::from("logs"),
            token_url: Url::parse(DEFAULT_TOKEN_URL).expect("default token url is valid"),
            db_url: None,
            notify_api_url: None,
            notify_key: None,
            project_name: "MS-Graph-Refresher".to_string(),
            refresh_delay_ms: 1000,
            cycle_interval_secs: 7 * 24 * 60 * 60,
            http_timeout_secs: 15,
            proxy: None,
        }
    }
}

impl Config {
    /// Extract the configuration from the environment.
    pub fn load() -> Result<Self, KeeperError> {
        Self::figment().extract().map_err(KeeperError::from)
    }

    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default())).merge(Env::raw().only(ENV_KEYS))
    }

    pub fn refresh_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_delay_ms)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Base reqwest client shared by the token exchange and the notifier.
    pub fn http_client(&self) -> Result<reqwest::Client, KeeperError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("credential-keeper/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(self.http_timeout())
            // oauth2 requires redirects to be disabled to avoid SSRF.
            .redirect(reqwest::redirect::Policy::none());
        if let Some(proxy_url) = self.proxy.as_ref() {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url.as_str())?);
        }
        Ok(builder.build()?)
    }

    /// Treat blank values the same as unset ones.
    pub fn db_url(&self) -> Option<&str> {
        non_blank(self.db_url.as_deref())
    }

    pub fn notify_api_url(&self) -> Option<&str> {
        non_blank(self.notify_api_url.as_deref())
    }

    pub fn notify_key(&self) -> Option<&str> {
        non_blank(self.notify_key.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
