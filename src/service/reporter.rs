//! Cycle summary: read both reports, grade the cycle, notify once.

use crate::report::{RefreshReport, ReportPaths, SyncReport, read_report};
use crate::service::notifier::{Delivery, Notifier, NotifyLevel};
use chrono::{DateTime, Local};
use serde::de::DeserializeOwned;
use std::fmt::Write as _;
use std::path::Path;
use tracing::{error, info};

/// Failed credentials listed individually in a notification.
const MAX_LISTED_FAILURES: usize = 5;
const RULE: &str = "------------------";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn level(self) -> NotifyLevel {
        match self {
            Severity::Success => NotifyLevel::Success,
            Severity::Warning => NotifyLevel::Warning,
            Severity::Error => NotifyLevel::Error,
        }
    }
}

/// Overall health of one cycle and its one-line headline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleHealth {
    pub severity: Severity,
    pub headline: &'static str,
}

impl CycleHealth {
    pub fn classify(refresh: &RefreshReport, sync: &SyncReport) -> Self {
        let (severity, headline) = if refresh.error.is_some() || sync.error.is_some() {
            (Severity::Error, "execution exception")
        } else if !refresh.failed.is_empty() {
            if refresh.success == 0 && refresh.total > 0 {
                (Severity::Error, "total refresh failure")
            } else {
                (Severity::Warning, "partial refresh failure")
            }
        } else {
            (Severity::Success, "cycle completed")
        };
        Self { severity, headline }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotifyLevel,
    pub title: String,
    pub content: String,
}

/// Render the notification for a pair of reports.
pub fn summarize(
    project_name: &str,
    refresh: &RefreshReport,
    sync: &SyncReport,
    run_at: DateTime<Local>,
) -> Notification {
    let health = CycleHealth::classify(refresh, sync);
    let mut content = format!("Run at: {}\n{RULE}\n", run_at.format("%Y-%m-%d %H:%M:%S"));

    let title = if health.severity == Severity::Success {
        let _ = writeln!(
            content,
            "Token refresh: {}/{} succeeded",
            refresh.success, refresh.total
        );
        let _ = writeln!(
            content,
            "DB sync: {} inserted, {} updated",
            sync.stats.inserted, sync.stats.updated
        );
        content.push_str("All services healthy.");
        format!("{project_name}: {}", health.headline)
    } else {
        content.push_str("[Token refresh]\n");
        if let Some(err) = refresh.error.as_deref() {
            let _ = writeln!(content, "Exception: {err}");
        } else {
            let _ = writeln!(content, "Succeeded: {}/{}", refresh.success, refresh.total);
            if !refresh.failed.is_empty() {
                let _ = writeln!(content, "Failures ({}):", refresh.failed.len());
                for item in refresh.failed.iter().take(MAX_LISTED_FAILURES) {
                    let _ = writeln!(content, "- {}: {}", item.identity, item.reason);
                }
                if refresh.failed.len() > MAX_LISTED_FAILURES {
                    let _ = writeln!(
                        content,
                        "... and {} more",
                        refresh.failed.len() - MAX_LISTED_FAILURES
                    );
                }
            }
        }

        let _ = writeln!(content, "{RULE}\n[DB sync]");
        if let Some(err) = sync.error.as_deref() {
            let _ = write!(content, "Exception: {err}");
        } else {
            let _ = write!(
                content,
                "Inserted: {}, Updated: {}, Skipped: {}",
                sync.stats.inserted, sync.stats.updated, sync.stats.skipped
            );
        }
        format!("{project_name}: {}", health.headline)
    };

    Notification {
        level: health.severity.level(),
        title,
        content,
    }
}

/// Read a report; a missing or unreadable file becomes a report-level error.
pub fn load_report<T>(path: &Path, fatal: impl FnOnce(String) -> T) -> T
where
    T: DeserializeOwned,
{
    if !path.exists() {
        error!(path = %path.display(), "report file not found");
        return fatal("report file not found".to_string());
    }
    match read_report(path) {
        Ok(report) => report,
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to read report");
            fatal(e.to_string())
        }
    }
}

pub struct Reporter {
    paths: ReportPaths,
    notifier: Notifier,
    project_name: String,
}

impl Reporter {
    pub fn new(paths: ReportPaths, notifier: Notifier, project_name: impl Into<String>) -> Self {
        Self {
            paths,
            notifier,
            project_name: project_name.into(),
        }
    }

    pub fn paths(&self) -> &ReportPaths {
        &self.paths
    }

    /// Summarize the latest reports and send exactly one notification.
    pub async fn report(&self) -> (Notification, Delivery) {
        let refresh: RefreshReport = load_report(&self.paths.refresh, RefreshReport::fatal);
        let sync: SyncReport = load_report(&self.paths.sync, SyncReport::fatal);
        let notification = summarize(&self.project_name, &refresh, &sync, Local::now());

        info!(level = ?notification.level, title = %notification.title, "sending cycle summary");
        let delivery = self
            .notifier
            .send(&notification.title, &notification.content, notification.level)
            .await;
        (notification, delivery)
    }
}
