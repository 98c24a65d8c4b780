//! Per-cycle report documents exchanged between sub-steps.
//!
//! The refresh and sync sub-steps run in child processes; the only thing
//! they hand back to the scheduler is one of these files.

use crate::credentials::store::write_atomic;
use crate::error::KeeperError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const REFRESH_REPORT_FILE: &str = "refresh_report.json";
pub const SYNC_REPORT_FILE: &str = "sync_report.json";
/// Identity used for failures that are not tied to one credential.
pub const SYSTEM_IDENTITY: &str = "SYSTEM";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRecord {
    #[serde(alias = "email")]
    pub identity: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshReport {
    /// Entries in the store, complete or not.
    pub total: usize,
    pub success: usize,
    /// Incomplete entries that were left alone.
    pub skipped: usize,
    pub failed: Vec<FailedRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RefreshReport {
    pub fn fatal(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn record_failure(&mut self, identity: impl Into<String>, reason: impl Into<String>) {
        self.failed.push(FailedRecord {
            identity: identity.into(),
            reason: reason.into(),
        });
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncStats {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncReport {
    pub stats: SyncStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncReport {
    pub fn fatal(error: impl Into<String>) -> Self {
        Self {
            stats: SyncStats::default(),
            error: Some(error.into()),
        }
    }
}

/// Well-known locations of the two report documents.
#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub refresh: PathBuf,
    pub sync: PathBuf,
}

impl ReportPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            refresh: dir.join(REFRESH_REPORT_FILE),
            sync: dir.join(SYNC_REPORT_FILE),
        }
    }
}

/// Overwrite `path` with `report`.
pub fn write_report<T: Serialize>(path: &Path, report: &T) -> Result<(), KeeperError> {
    let body = serde_json::to_string_pretty(report)?;
    write_atomic(path, body.as_bytes())
}

pub fn read_report<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, KeeperError> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn reports_are_overwritten_not_appended() {
        let dir = TempDir::new().unwrap();
        let paths = ReportPaths::in_dir(&dir.path().join("logs"));

        let mut first = RefreshReport {
            total: 3,
            success: 1,
            ..Default::default()
        };
        first.record_failure("a@example.com", "no token returned");
        write_report(&paths.refresh, &first).unwrap();
        write_report(&paths.refresh, &RefreshReport::fatal("boom")).unwrap();

        let read: RefreshReport = read_report(&paths.refresh).unwrap();
        assert_eq!(read, RefreshReport::fatal("boom"));
        assert_eq!(read.total, 0);
    }

    #[test]
    fn sparse_documents_fill_defaults() {
        let report: SyncReport = serde_json::from_str(r#"{"stats": {"inserted": 2}}"#).unwrap();
        assert_eq!(report.stats.inserted, 2);
        assert_eq!(report.stats.updated, 0);
        assert!(report.error.is_none());

        let refresh: RefreshReport =
            serde_json::from_str(r#"{"total": 1, "failed": [{"email": "x", "reason": "y"}]}"#).unwrap();
        assert_eq!(refresh.failed[0].identity, "x");
    }
}
