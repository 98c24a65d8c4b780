use crate::error::KeeperError;
use crate::report::{RefreshReport, SyncReport, write_report};
use crate::service::reporter::Reporter;
use crate::service::scheduler::{CycleRunner, Step, StepOutcome};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Runs refresh and sync as child processes of this same binary and the
/// report in-process.
///
/// A step's report file is removed before the child starts, so the summary
/// never grades a previous cycle's report. A child that fails without
/// writing its report gets a fatal one naming the exit status.
pub struct ProcessRunner {
    exe: PathBuf,
    reporter: Reporter,
}

impl ProcessRunner {
    pub fn new(exe: PathBuf, reporter: Reporter) -> Self {
        Self { exe, reporter }
    }

    /// Re-invoke the running executable for sub-steps.
    pub fn current_exe(reporter: Reporter) -> Result<Self, KeeperError> {
        Ok(Self::new(std::env::current_exe()?, reporter))
    }

    fn command(&self, step: Step) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.exe);
        cmd.arg(step.subcommand())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(false);
        // own process group: a terminal Ctrl+C reaches the scheduler only,
        // which lets the running child finish
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    fn report_path(&self, step: Step) -> &Path {
        let paths = self.reporter.paths();
        match step {
            Step::Refresh => &paths.refresh,
            Step::Sync => &paths.sync,
        }
    }

    fn clear_report(&self, step: Step) {
        let path = self.report_path(step);
        match std::fs::remove_file(path) {
            Ok(()) => debug!(step = %step, path = %path.display(), "previous report removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(step = %step, path = %path.display(), error = %e, "cannot remove previous report"),
        }
    }

    /// Leave a fatal report behind for a step that died without one.
    fn record_crash(&self, step: Step, detail: String) {
        let path = self.report_path(step);
        if path.exists() {
            return;
        }
        let written = match step {
            Step::Refresh => write_report(path, &RefreshReport::fatal(detail)),
            Step::Sync => write_report(path, &SyncReport::fatal(detail)),
        };
        if let Err(e) = written {
            error!(step = %step, path = %path.display(), error = %e, "cannot write fatal report");
        }
    }
}

impl CycleRunner for ProcessRunner {
    async fn run_step(&self, step: Step) -> StepOutcome {
        info!(step = %step, "starting step");
        self.clear_report(step);
        let started = Instant::now();
        match self.command(step).status().await {
            Ok(status) if status.success() => {
                info!(
                    step = %step,
                    elapsed_secs = started.elapsed().as_secs_f64(),
                    "step finished"
                );
                StepOutcome::Succeeded
            }
            Ok(status) => {
                error!(
                    step = %step,
                    code = ?status.code(),
                    elapsed_secs = started.elapsed().as_secs_f64(),
                    "step exited with failure"
                );
                let detail = match status.code() {
                    Some(code) => format!("{step} step exited with code {code}"),
                    None => format!("{step} step was terminated by a signal"),
                };
                self.record_crash(step, detail);
                StepOutcome::Failed(status.code())
            }
            Err(e) => {
                error!(step = %step, exe = %self.exe.display(), error = %e, "cannot start step");
                self.record_crash(step, format!("{step} step could not be started: {e}"));
                StepOutcome::SpawnFailed
            }
        }
    }

    async fn report(&self) {
        self.reporter.report().await;
    }
}
