// src/agent/health.rs

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Liveness and failure bookkeeping for one agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthRecord {
    /// Last time the agent showed progress (RFC 3339 in JSON).
    pub last_heartbeat: DateTime<Utc>,
    /// Failed workflow runs since the last successful one.
    pub consecutive_failures: u32,
    pub total_failures: u32,
    pub total_runs: u64,
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRecord {
    pub fn new() -> Self {
        Self {
            last_heartbeat: Utc::now(),
            consecutive_failures: 0,
            total_failures: 0,
            total_runs: 0,
        }
    }

    pub fn beat(&mut self) {
        self.last_heartbeat = Utc::now();
    }

    pub fn record_success(&mut self) {
        self.beat();
        self.total_runs += 1;
        self.consecutive_failures = 0;
    }

    /// Returns the new consecutive-failure count.
    pub fn record_failure(&mut self) -> u32 {
        self.beat();
        self.total_runs += 1;
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_failures
    }

    /// A run that was stopped from outside counts as neither.
    pub fn record_cancelled(&mut self) {
        self.beat();
        self.total_runs += 1;
    }

    /// Time since the last heartbeat; zero if the clock went backwards.
    pub fn silence(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_heartbeat).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_silent(&self, max_silence: Duration, now: DateTime<Utc>) -> bool {
        self.silence(now) > max_silence
    }
}

