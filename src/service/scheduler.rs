//! The long-running control loop.
//!
//! One cycle is refresh, then sync, then a summary notification, then a long
//! interruptible sleep. The sub-steps go through a [`CycleRunner`]; in
//! production that runner spawns child processes so a fatal exit inside a
//! sub-step cannot take the loop down.
//!
//! Shutdown is cooperative: an interrupt or termination signal cancels a
//! [`CancellationToken`], which is checked between sub-steps and wakes the
//! sleep. A running sub-step is always allowed to finish.

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Refresh,
    Sync,
}

impl Step {
    /// CLI subcommand that runs this step in a child process.
    pub fn subcommand(self) -> &'static str {
        match self {
            Step::Refresh => "refresh",
            Step::Sync => "sync",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subcommand())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded,
    /// Exited unsuccessfully; `None` when killed by a signal.
    Failed(Option<i32>),
    /// Could not be started at all.
    SpawnFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running(Step),
    Reporting,
    Sleeping,
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Elapsed,
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleEnd {
    Completed,
    Interrupted,
}

/// Executes the pieces of one cycle.
pub trait CycleRunner: Send + Sync {
    fn run_step(&self, step: Step) -> impl Future<Output = StepOutcome> + Send;
    fn report(&self) -> impl Future<Output = ()> + Send;
}

/// Sleep for `duration` unless `shutdown` fires first.
pub async fn interruptible_wait(shutdown: &CancellationToken, duration: Duration) -> WaitOutcome {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => WaitOutcome::Interrupted,
        _ = tokio::time::sleep(duration) => WaitOutcome::Elapsed,
    }
}

pub struct Scheduler<R> {
    runner: R,
    interval: Duration,
    shutdown: CancellationToken,
    state: SchedulerState,
    history: Vec<SchedulerState>,
}

impl<R: CycleRunner> Scheduler<R> {
    pub fn new(runner: R, interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            runner,
            interval,
            shutdown,
            state: SchedulerState::Idle,
            history: vec![SchedulerState::Idle],
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Every state entered so far, in order.
    pub fn history(&self) -> &[SchedulerState] {
        &self.history
    }

    /// Run cycles until shutdown is requested.
    pub async fn run(&mut self) -> SchedulerState {
        info!(interval_secs = self.interval.as_secs(), "scheduler started");
        loop {
            if self.run_cycle().await == CycleEnd::Interrupted {
                break;
            }
            self.transition(SchedulerState::Sleeping);
            info!(secs = self.interval.as_secs(), "cycle finished; sleeping");
            if interruptible_wait(&self.shutdown, self.interval).await == WaitOutcome::Interrupted {
                info!("sleep interrupted");
                break;
            }
        }
        self.shut_down()
    }

    /// Run a single cycle, then stop.
    pub async fn run_once(&mut self) -> SchedulerState {
        self.run_cycle().await;
        self.shut_down()
    }

    /// Refresh, sync, report. Shutdown is checked before each part; a
    /// shutdown that arrives after sync suppresses the report of that
    /// partial cycle.
    pub async fn run_cycle(&mut self) -> CycleEnd {
        info!("starting cycle");
        for step in [Step::Refresh, Step::Sync] {
            if self.shutdown.is_cancelled() {
                warn!(next = %step, "shutdown requested; not starting next step");
                return CycleEnd::Interrupted;
            }
            self.transition(SchedulerState::Running(step));
            match self.runner.run_step(step).await {
                StepOutcome::Succeeded => debug!(step = %step, "step succeeded"),
                StepOutcome::Failed(code) => {
                    error!(step = %step, code = ?code, "step failed; continuing with the cycle")
                }
                StepOutcome::SpawnFailed => {
                    error!(step = %step, "step could not be started; continuing with the cycle")
                }
            }
        }

        if self.shutdown.is_cancelled() {
            warn!("shutdown requested; skipping the cycle report");
            return CycleEnd::Interrupted;
        }
        self.transition(SchedulerState::Reporting);
        self.runner.report().await;
        CycleEnd::Completed
    }

    fn shut_down(&mut self) -> SchedulerState {
        self.transition(SchedulerState::ShuttingDown);
        info!("scheduler stopped");
        self.state
    }

    fn transition(&mut self, next: SchedulerState) {
        debug!(from = ?self.state, to = ?next, "scheduler transition");
        self.state = next;
        self.history.push(next);
    }
}

/// Cancel `shutdown` on the first interrupt or termination signal. The
/// listener lives for the whole process.
pub fn listen_for_shutdown(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let signal = wait_for_signal().await;
        info!(signal, "shutdown requested; the current step will finish first");
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM; only SIGINT will stop the scheduler");
            return ctrl_c().await;
        }
    };
    tokio::select! {
        name = ctrl_c() => name,
        _ = term.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for interrupts");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn wait_elapses_without_shutdown() {
        let token = CancellationToken::new();
        let outcome = interruptible_wait(&token, Duration::from_secs(7 * 24 * 3600)).await;
        assert_eq!(outcome, WaitOutcome::Elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_is_interrupted_by_shutdown() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            trigger.cancel();
        });
        let started = tokio::time::Instant::now();
        let outcome = interruptible_wait(&token, Duration::from_secs(7 * 24 * 3600)).await;
        assert_eq!(outcome, WaitOutcome::Interrupted);
        assert!(started.elapsed() < Duration::from_secs(120));
    }

    #[tokio::test]
    async fn already_cancelled_wait_returns_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        let outcome = interruptible_wait(&token, Duration::from_secs(3600)).await;
        assert_eq!(outcome, WaitOutcome::Interrupted);
    }
}
