//! Scripted collaborators for driving the attempt loop in tests.
use crate::probe::{ProbeOutcome, Prober};
use crate::restart::{RestartOutcome, Restarter};
use crate::retry::Sleeper;
use std::collections::VecDeque;
use std::time::Duration;

/// Replays a fixed list of probe outcomes, then keeps failing.
pub struct ScriptedProber {
    script: VecDeque<ProbeOutcome>,
    pub calls: u32,
}

impl ScriptedProber {
    pub fn new(script: impl IntoIterator<Item = ProbeOutcome>) -> Self {
        Self {
            script: script.into_iter().collect(),
            calls: 0,
        }
    }

    /// Every probe returns the same status code.
    pub fn always(code: u16) -> Self {
        Self::new(std::iter::repeat(ProbeOutcome::status(code)).take(64))
    }
}

impl Prober for ScriptedProber {
    async fn probe(&mut self, _url: &str, _timeout: Duration) -> ProbeOutcome {
        self.calls += 1;
        self.script
            .pop_front()
            .unwrap_or_else(|| ProbeOutcome::failed("script exhausted"))
    }
}

/// Replays a fixed list of restart outcomes, then keeps succeeding.
pub struct ScriptedRestarter {
    script: VecDeque<RestartOutcome>,
    pub services: Vec<String>,
}

impl ScriptedRestarter {
    pub fn new(script: impl IntoIterator<Item = RestartOutcome>) -> Self {
        Self {
            script: script.into_iter().collect(),
            services: Vec::new(),
        }
    }

    pub fn always_ok() -> Self {
        Self::new([])
    }

    pub fn calls(&self) -> usize {
        self.services.len()
    }
}

impl Restarter for ScriptedRestarter {
    async fn restart(&mut self, service: &str) -> RestartOutcome {
        self.services.push(service.to_string());
        self.script.pop_front().unwrap_or_else(RestartOutcome::ok)
    }
}

/// Records requested waits without sleeping.
#[derive(Default)]
pub struct RecordingSleeper {
    pub waits: Vec<Duration>,
}

impl Sleeper for RecordingSleeper {
    async fn sleep(&mut self, duration: Duration) {
        self.waits.push(duration);
    }
}
