use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounded restart policy with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
        }
    }
}

impl RestartPolicy {
    /// Delay before the `restart`-th restart (1-based): `initial * 2^(n-1)`,
    /// capped at `max_backoff_ms`.
    pub fn delay_for(&self, restart: u32) -> Duration {
        let exponent = restart.saturating_sub(1).min(63);
        let factor = 1u64 << exponent;
        let millis = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}
