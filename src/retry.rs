use crate::config::RetryConfig;
use crate::probe::Prober;
use crate::restart::Restarter;
use crate::status::{AttemptRecord, RestartRecord};
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Waits between attempts.
pub trait Sleeper {
    async fn sleep(&mut self, duration: Duration);
}

/// Sleeps on the tokio timer.
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    async fn sleep(&mut self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// States of the attempt loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Probing,
    Restarting,
    Waiting,
    /// Terminal: the probe returned the success status.
    Succeeded,
    /// Terminal: every attempt failed.
    Exhausted,
}

/// Attempt budget and linear backoff schedule.
///
/// The wait after attempt `n` is `base_wait + (n - 1) * increment`; there is
/// no wait after the final attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_wait: Duration,
    increment: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_wait: Duration, increment: Duration) -> Self {
        Self {
            max_retries,
            base_wait,
            increment,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_secs(config.base_wait_secs),
            Duration::from_secs(config.wait_increment_secs),
        )
    }

    /// Wait to apply after 1-based `attempt`, or `None` if it is the last.
    pub fn wait_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let steps = attempt.saturating_sub(1);
        Some(
            self.base_wait
                .saturating_add(self.increment.saturating_mul(steps)),
        )
    }
}

/// What is being watched and what counts as healthy.
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    pub url: &'a str,
    pub timeout: Duration,
    pub success_status: u16,
    pub service: &'a str,
}

/// Result of the whole attempt loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptsResult {
    pub succeeded: bool,
    pub attempts: Vec<AttemptRecord>,
    pub restart_errors: Vec<String>,
}

/// Probe, restart on anything but the success status, back off, repeat.
///
/// A restart follows every failed probe, including ones that got no response
/// at all. The loop stops at the first success and does nothing further.
pub async fn run_attempts<P, R, S>(
    target: Target<'_>,
    policy: &RetryPolicy,
    prober: &mut P,
    restarter: &mut R,
    sleeper: &mut S,
) -> AttemptsResult
where
    P: Prober,
    R: Restarter,
    S: Sleeper,
{
    let mut attempts: Vec<AttemptRecord> = Vec::new();
    let mut restart_errors = Vec::new();
    let mut attempt = 1u32;
    let mut state = AttemptState::Probing;

    loop {
        debug!(attempt, ?state, "attempt loop");
        state = match state {
            AttemptState::Probing => {
                let outcome = prober.probe(target.url, target.timeout).await;
                let healthy = outcome.status == Some(target.success_status);
                attempts.push(AttemptRecord {
                    ordinal: attempt,
                    http_status: outcome.status,
                    http_error: outcome.error,
                    checked_at: Utc::now(),
                    restart: None,
                });
                if healthy {
                    AttemptState::Succeeded
                } else {
                    AttemptState::Restarting
                }
            }
            AttemptState::Restarting => {
                let outcome = restarter.restart(target.service).await;
                if !outcome.ok {
                    restart_errors.push(outcome.message.clone());
                }
                if let Some(record) = attempts.last_mut() {
                    record.restart = Some(RestartRecord {
                        restart_called: true,
                        restart_ok: outcome.ok,
                        restart_msg: outcome.message,
                    });
                }
                if policy.wait_after(attempt).is_some() {
                    AttemptState::Waiting
                } else {
                    AttemptState::Exhausted
                }
            }
            AttemptState::Waiting => {
                if let Some(wait) = policy.wait_after(attempt) {
                    info!(attempt, wait_secs = wait.as_secs(), "waiting before next probe");
                    sleeper.sleep(wait).await;
                }
                attempt += 1;
                AttemptState::Probing
            }
            AttemptState::Succeeded => {
                info!(attempt, "service healthy");
                return AttemptsResult {
                    succeeded: true,
                    attempts,
                    restart_errors,
                };
            }
            AttemptState::Exhausted => {
                warn!(
                    attempts = attempts.len(),
                    restart_failures = restart_errors.len(),
                    "retries exhausted, service still unhealthy"
                );
                return AttemptsResult {
                    succeeded: false,
                    attempts,
                    restart_errors,
                };
            }
        };
    }
}
