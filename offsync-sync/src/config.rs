//! Sync engine and scheduler tunables.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration shared by the engine, the scheduler and the connectivity
/// monitor. Durations are stored as milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum operations per dispatch batch.
    pub batch_size: usize,
    /// Transient failures tolerated before an operation is Failed.
    pub max_attempts: u32,
    /// Retry delays, indexed by failure count. The last entry repeats.
    pub backoff_ms: Vec<u64>,
    /// Window that coalesces rapid local writes into one trigger.
    pub debounce_ms: u64,
    /// Periodic sync interval while Online.
    pub periodic_interval_ms: u64,
    /// Connectivity probe cadence.
    pub probe_interval_ms: u64,
    /// Connectivity probe timeout.
    pub probe_timeout_ms: u64,
    /// Upper bound on one sync pass.
    pub pass_timeout_ms: u64,
    /// Distinct entities dispatched concurrently within a batch.
    pub max_concurrent_dispatch: usize,
    /// Pull server changes after each push.
    pub pull_after_push: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_attempts: 5,
            backoff_ms: vec![1_000, 2_000, 4_000, 8_000, 16_000],
            debounce_ms: 500,
            periodic_interval_ms: 300_000,
            probe_interval_ms: 30_000,
            probe_timeout_ms: 5_000,
            pass_timeout_ms: 120_000,
            max_concurrent_dispatch: 8,
            pull_after_push: true,
        }
    }
}

impl SyncConfig {
    /// Parses a (possibly partial) JSON document over the defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn periodic_interval(&self) -> Duration {
        Duration::from_millis(self.periodic_interval_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn pass_timeout(&self) -> Duration {
        Duration::from_millis(self.pass_timeout_ms)
    }
}
