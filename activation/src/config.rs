use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The real-time windows structuring a PoET round within an epoch, plus
/// retry policy for PoET RPCs. Field names track the configuration keys
/// in the node's config file (`phase-shift`, `cycle-gap`, ...).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoetConfig {
    pub phase_shift: Duration,
    pub cycle_gap: Duration,
    pub grace_period: Duration,
    pub retry_delay: Duration,
    pub retry_max: u32,
    /// How long the builder sleeps after a `PoetServiceUnstable` error
    /// before retrying the loop.
    pub poet_retry_interval: Duration,
    /// Jitter spread across the grace window, as a percentage of
    /// `grace_period` (the source's "1.0 means 100%" convention —
    /// accepted here as a percentage in `[0, 100]`, not a fraction).
    pub max_jitter_percent: u32,
}

impl Default for PoetConfig {
    fn default() -> Self {
        Self {
            phase_shift: Duration::from_secs(0),
            cycle_gap: Duration::from_secs(12 * 60 * 60),
            grace_period: Duration::from_secs(60 * 60),
            retry_delay: Duration::from_millis(400),
            retry_max: 10,
            poet_retry_interval: Duration::from_secs(5),
            max_jitter_percent: 100,
        }
    }
}
