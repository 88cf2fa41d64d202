use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Hare protocol parameters; field names track the node config keys
/// (`hare-committee-size`, `hare-round-duration`, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HareConfig {
    pub committee_size: u16,
    pub round_duration: Duration,
    pub wakeup_delta: Duration,
    pub exp_leaders: u16,
    pub limit_iterations: u32,
    pub limit_concurrent: usize,
    pub hdist: u32,
    /// Assumed gossip propagation delay, used by the good-proposals
    /// filter to grade an ATX's timing against an epoch's start.
    pub network_delay: Duration,
}

impl Default for HareConfig {
    fn default() -> Self {
        Self {
            committee_size: 400,
            round_duration: Duration::from_secs(15),
            wakeup_delta: Duration::from_secs(3),
            exp_leaders: 5,
            limit_iterations: 8,
            limit_concurrent: 5,
            hdist: 10,
            network_delay: Duration::from_secs(5),
        }
    }
}
