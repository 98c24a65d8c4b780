use crate::config::Config;
use crate::error::KeeperError;
use backon::{ExponentialBuilder, Retryable};
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn};

const PROJECT_KEY_HEADER: &str = "X-Project-Key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// How a notification ended; informational only, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Unconfigured,
    AuthRejected,
    Failed,
}

#[derive(Serialize)]
struct NotifyPayload<'a> {
    project_name: &'a str,
    title: &'a str,
    content: &'a str,
    level: NotifyLevel,
}

fn default_retry_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(3))
        .with_max_times(3)
        .with_jitter()
}

/// Client for the HTTP notification hub.
#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    api_url: Option<String>,
    api_key: Option<String>,
    project_name: String,
    retry_policy: ExponentialBuilder,
}

impl Notifier {
    pub fn new(
        client: reqwest::Client,
        api_url: Option<String>,
        api_key: Option<String>,
        project_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_url,
            api_key,
            project_name: project_name.into(),
            retry_policy: default_retry_policy(),
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self, KeeperError> {
        Ok(Self::new(
            cfg.http_client()?,
            cfg.notify_api_url().map(str::to_string),
            cfg.notify_key().map(str::to_string),
            cfg.project_name.clone(),
        ))
    }

    pub fn with_retry_policy(mut self, policy: ExponentialBuilder) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Deliver one notification. Every outcome is logged and returned;
    /// nothing here can fail the caller.
    pub async fn send(&self, title: &str, content: &str, level: NotifyLevel) -> Delivery {
        let (Some(api_url), Some(api_key)) = (self.api_url.as_deref(), self.api_key.as_deref())
        else {
            warn!(
                api_url = self.api_url.as_deref().unwrap_or("<none>"),
                api_key = if self.api_key.is_some() { "***" } else { "<none>" },
                "notification sink not configured; skipping"
            );
            return Delivery::Unconfigured;
        };
        if !api_url.starts_with("http") {
            warn!(api_url, "notification url does not look like an http url");
        }

        let payload = NotifyPayload {
            project_name: &self.project_name,
            title,
            content,
            level,
        };

        let result = (|| async {
            self.client
                .post(api_url)
                .header(PROJECT_KEY_HEADER, api_key)
                .json(&payload)
                .send()
                .await
                .map_err(KeeperError::from)
        })
        .retry(self.retry_policy.clone())
        .when(|e: &KeeperError| e.is_retryable())
        .notify(|err, dur: Duration| {
            warn!("notification retrying after error {}, sleeping {:?}", err, dur);
        })
        .await;

        match result {
            Ok(resp) if resp.status() == StatusCode::OK => {
                info!(level = ?level, "notification delivered");
                Delivery::Delivered
            }
            Ok(resp) if resp.status() == StatusCode::FORBIDDEN => {
                error!("notification rejected: check NOTIFY_KEY");
                Delivery::AuthRejected
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                error!(%status, body = %body, "notification delivery failed");
                Delivery::Failed
            }
            Err(e) => {
                error!(error = %e, "notification request failed");
                Delivery::Failed
            }
        }
    }
}
