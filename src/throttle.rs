//! Cross-invocation throttling.
//!
//! After a failed run, only every Nth invocation proceeds; the rest are
//! skipped. Skipped runs count as continued failures. The counter returns to
//! zero as soon as a run succeeds.
use crate::state_store::{self, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Persisted throttle state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleState {
    pub last_failed: bool,
    pub counter: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Whether this invocation should run, plus the state to persist at the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleDecision {
    pub skip: bool,
    pub state: ThrottleState,
}

/// Decide whether to skip this invocation given the previous state.
///
/// With `last_failed` false the counter resets and the run proceeds. Otherwise
/// the counter advances by one and the run proceeds only when it lands on a
/// multiple of `every_n`.
pub fn should_throttle(mut state: ThrottleState, every_n: u64) -> ThrottleDecision {
    if !state.last_failed {
        state.counter = 0;
        return ThrottleDecision { skip: false, state };
    }

    state.counter = state.counter.saturating_add(1);
    let skip = every_n > 1 && state.counter % every_n != 0;
    ThrottleDecision { skip, state }
}

/// Record the result of this invocation on the state.
pub fn record_outcome(state: &mut ThrottleState, last_failed: bool, now: DateTime<Utc>) {
    state.last_failed = last_failed;
    if !last_failed {
        state.counter = 0;
    }
    state.updated_at = Some(now);
}

/// The throttle file on disk.
pub struct ThrottleFile {
    path: PathBuf,
}

impl ThrottleFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load the state; missing or malformed files read as a clean slate.
    pub fn load(&self) -> ThrottleState {
        state_store::read_or_default(&self.path)
    }

    /// Stamp the outcome on `state` and persist it.
    pub fn update(&self, state: &mut ThrottleState, last_failed: bool) -> Result<(), StoreError> {
        record_outcome(state, last_failed, Utc::now());
        state_store::write_atomic(&self.path, state)
    }

    #[allow(dead_code)]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
