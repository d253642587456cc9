/// Status file: the typed record of the most recent invocation.
///
/// Written once per run through the atomic state store, with sorted keys so
/// successive versions diff cleanly.
use crate::config::WatchdogConfig;
use crate::state_store::{self, StoreError};
use crate::throttle::ThrottleState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// One probe cycle within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    #[serde(rename = "try")]
    pub ordinal: u32,
    /// Absent when the probe got no response.
    pub http_status: Option<u16>,
    pub http_error: Option<String>,
    pub checked_at: DateTime<Utc>,
    /// Present only when this attempt triggered a restart.
    #[serde(flatten)]
    pub restart: Option<RestartRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartRecord {
    pub restart_called: bool,
    pub restart_ok: bool,
    pub restart_msg: String,
}

/// The settings a run was made with, echoed into the status file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsEcho {
    pub url: String,
    pub service: String,
    pub max_retries: u32,
    pub base_wait_seconds: u64,
    pub wait_increment_seconds: u64,
}

impl SettingsEcho {
    pub fn from_config(config: &WatchdogConfig) -> Self {
        Self {
            url: config.target.url.clone(),
            service: config.service.name.clone(),
            max_retries: config.retry.max_retries,
            base_wait_seconds: config.retry.base_wait_secs,
            wait_increment_seconds: config.retry.wait_increment_secs,
        }
    }
}

/// Summary of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub succeeded: bool,
    pub attempts: Vec<AttemptRecord>,
    pub restart_errors: Vec<String>,
    pub skipped_due_to_throttle: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(flatten)]
    pub settings: SettingsEcho,
}

impl RunOutcome {
    /// Outcome of an invocation the throttle skipped.
    pub fn skipped(settings: SettingsEcho, every_n: u64) -> Self {
        Self {
            succeeded: false,
            attempts: Vec::new(),
            restart_errors: Vec::new(),
            skipped_due_to_throttle: true,
            note: Some(format!(
                "Previous run failed; running only 1 in {every_n} invocations."
            )),
            settings,
        }
    }

    /// Outcome of an invocation that hit an unexpected fault.
    pub fn fault(settings: SettingsEcho, note: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            attempts: Vec::new(),
            restart_errors: Vec::new(),
            skipped_due_to_throttle: false,
            note: Some(note.into()),
            settings,
        }
    }
}

/// The JSON payload written to the status file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: RunOutcome,
}

/// The status file on disk.
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Stamp and atomically write the outcome.
    pub fn write(&self, outcome: &RunOutcome) -> Result<(), StoreError> {
        let report = StatusReport {
            updated_at: Utc::now(),
            outcome: outcome.clone(),
        };
        state_store::write_atomic(&self.path, &report)
    }

    /// Last written report, if any can be read.
    pub fn load(&self) -> Option<StatusReport> {
        state_store::read_or_default(&self.path)
    }

    #[allow(dead_code)]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Human-readable summary for `--status`.
pub fn render_summary(report: Option<&StatusReport>, throttle: &ThrottleState) -> String {
    let mut out = String::new();

    match report {
        None => out.push_str("No status recorded yet.\n"),
        Some(r) => {
            let o = &r.outcome;
            let result = if o.skipped_due_to_throttle {
                "skipped (throttled)"
            } else if o.succeeded {
                "succeeded"
            } else {
                "failed"
            };
            let _ = writeln!(out, "Last run:   {result} at {}", r.updated_at.to_rfc3339());
            let _ = writeln!(
                out,
                "Target:     {} (service {})",
                o.settings.url, o.settings.service
            );
            let _ = writeln!(
                out,
                "Attempts:   {} of {}",
                o.attempts.len(),
                o.settings.max_retries
            );
            for a in &o.attempts {
                let probe = match (a.http_status, &a.http_error) {
                    (Some(code), _) => format!("HTTP {code}"),
                    (None, Some(err)) => err.clone(),
                    (None, None) => "no response".to_string(),
                };
                let restart = match &a.restart {
                    Some(r) if r.restart_ok => ", restarted".to_string(),
                    Some(r) => format!(", restart failed: {}", r.restart_msg),
                    None => String::new(),
                };
                let _ = writeln!(out, "  #{}: {probe}{restart}", a.ordinal);
            }
            if let Some(note) = &o.note {
                let _ = writeln!(out, "Note:       {note}");
            }
        }
    }

    let _ = writeln!(
        out,
        "Throttle:   last_failed={} counter={}",
        throttle.last_failed, throttle.counter
    );
    out
}
