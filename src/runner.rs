//! One watchdog invocation: lock, throttle gate, attempt loop, persistence.
use crate::config::{LockFallback, WatchdogConfig};
use crate::lock::{self, LockAttempt};
use crate::probe::Prober;
use crate::restart::Restarter;
use crate::retry::{self, RetryPolicy, Sleeper, Target};
use crate::state_store::StoreError;
use crate::status::{RunOutcome, SettingsEcho, StatusFile};
use crate::throttle::{self, ThrottleFile};

/// How an invocation ended.
#[derive(Debug)]
pub enum RunReport {
    /// Another instance holds the lock; nothing was done.
    AlreadyRunning,
    /// The lock could not be taken and the fallback policy says not to run.
    LockUnavailable,
    /// The throttle skipped this invocation.
    Throttled(RunOutcome),
    /// The attempt loop ran to completion.
    Completed(RunOutcome),
}

impl RunReport {
    /// Process exit status for this report.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunReport::AlreadyRunning | RunReport::Throttled(_) => 0,
            RunReport::Completed(outcome) if outcome.succeeded => 0,
            RunReport::Completed(_) | RunReport::LockUnavailable => 1,
        }
    }
}

/// Errors that abort a run.
#[derive(Debug)]
pub enum RunError {
    Store(StoreError),
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Store(e) => write!(f, "failed to persist run state: {e}"),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Store(e) => Some(e),
        }
    }
}

impl From<StoreError> for RunError {
    fn from(e: StoreError) -> Self {
        RunError::Store(e)
    }
}

/// Run one invocation against the configured target.
pub async fn run<P, R, S>(
    config: &WatchdogConfig,
    prober: &mut P,
    restarter: &mut R,
    sleeper: &mut S,
) -> Result<RunReport, RunError>
where
    P: Prober,
    R: Restarter,
    S: Sleeper,
{
    let run_lock = match lock::try_acquire(&config.files.lock) {
        LockAttempt::Acquired(l) => Some(l),
        LockAttempt::Contended => {
            tracing::debug!(path = %config.files.lock.display(), "another instance is running");
            return Ok(RunReport::AlreadyRunning);
        }
        LockAttempt::Unavailable(e) => match config.lock.on_error {
            LockFallback::Proceed => {
                tracing::warn!(
                    error = %e,
                    path = %config.files.lock.display(),
                    "could not take run lock, proceeding without it"
                );
                None
            }
            LockFallback::Exit => {
                tracing::error!(
                    error = %e,
                    path = %config.files.lock.display(),
                    "could not take run lock"
                );
                return Ok(RunReport::LockUnavailable);
            }
        },
    };

    let settings = SettingsEcho::from_config(config);
    let status_file = StatusFile::new(config.files.status.clone());
    let throttle_file = ThrottleFile::new(config.files.throttle.clone());
    let every_n = config.throttle.run_every_n_after_failure;

    let decision = throttle::should_throttle(throttle_file.load(), every_n);
    let mut throttle_state = decision.state;

    if decision.skip {
        tracing::info!(
            counter = throttle_state.counter,
            every_n,
            "skipping run due to previous failures"
        );
        throttle_file.update(&mut throttle_state, true)?;
        let outcome = RunOutcome::skipped(settings, every_n);
        status_file.write(&outcome)?;
        drop(run_lock);
        return Ok(RunReport::Throttled(outcome));
    }

    let target = Target {
        url: &config.target.url,
        timeout: config.target.timeout(),
        success_status: config.target.success_status,
        service: &config.service.name,
    };
    let policy = RetryPolicy::from_config(&config.retry);
    let result = retry::run_attempts(target, &policy, prober, restarter, sleeper).await;

    let outcome = RunOutcome {
        succeeded: result.succeeded,
        attempts: result.attempts,
        restart_errors: result.restart_errors,
        skipped_due_to_throttle: false,
        note: None,
        settings,
    };
    status_file.write(&outcome)?;
    throttle_file.update(&mut throttle_state, !outcome.succeeded)?;

    if let Some(l) = run_lock {
        l.release();
    }

    tracing::info!(
        succeeded = outcome.succeeded,
        attempts = outcome.attempts.len(),
        "run complete"
    );
    Ok(RunReport::Completed(outcome))
}

/// Run an invocation on a local task and map everything, including errors
/// and panics, to an exit status.
///
/// Faults are recorded in the status file on a best-effort basis.
pub async fn run_to_exit_code<P, R, S>(
    config: WatchdogConfig,
    mut prober: P,
    mut restarter: R,
    mut sleeper: S,
) -> i32
where
    P: Prober + 'static,
    R: Restarter + 'static,
    S: Sleeper + 'static,
{
    let task_config = config.clone();
    let local = tokio::task::LocalSet::new();
    let handle = local.spawn_local(async move {
        run(&task_config, &mut prober, &mut restarter, &mut sleeper).await
    });
    let joined = local.run_until(handle).await;

    match joined {
        Ok(Ok(report)) => report.exit_code(),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "run failed");
            record_fault(&config, &format!("run failed: {e}"));
            1
        }
        Err(e) => {
            tracing::error!(error = %e, "run aborted");
            record_fault(&config, &format!("run aborted: {e}"));
            1
        }
    }
}

/// Best-effort failed status for a run that could not finish normally.
pub fn record_fault(config: &WatchdogConfig, note: &str) {
    let outcome = RunOutcome::fault(SettingsEcho::from_config(config), note);
    if let Err(e) = StatusFile::new(config.files.status.clone()).write(&outcome) {
        tracing::warn!(error = %e, "failed to record fault in status file");
    }
}
