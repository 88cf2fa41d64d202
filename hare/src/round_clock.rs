//! Per-instance round timer: a wakeup event precedes round 0, then every
//! round gets a fixed-duration "end" event. Separate from [`clock::LayerClock`]
//! because a consensus instance's rounds are wall-clock-fixed-length,
//! not tied to the layer cadence itself.

use std::time::Duration;

use async_trait::async_trait;
use clock::LayerClock;
use common::Layer;
use std::sync::Arc;

use crate::types::Round;

#[async_trait]
pub trait RoundClock: Send + Sync {
    /// Resolves once it's time to start round 0 for this instance.
    async fn await_wakeup(&self, layer: Layer);

    /// Resolves once `round` has run for its fixed duration.
    async fn await_round_end(&self, round: Round);

    fn round_duration(&self) -> Duration;
}

/// Wakes at the instance's layer start (so a late-joining node still
/// participates in whatever round is current), then ticks every
/// `round_duration` afterwards.
pub struct FixedRoundClock {
    layer_clock: Arc<dyn LayerClock>,
    round_duration: Duration,
}

impl FixedRoundClock {
    pub fn new(layer_clock: Arc<dyn LayerClock>, round_duration: Duration) -> Self {
        Self {
            layer_clock,
            round_duration,
        }
    }
}

#[async_trait]
impl RoundClock for FixedRoundClock {
    async fn await_wakeup(&self, layer: Layer) {
        self.layer_clock.await_layer(layer).await;
    }

    async fn await_round_end(&self, _round: Round) {
        tokio::time::sleep(self.round_duration).await;
    }

    fn round_duration(&self) -> Duration {
        self.round_duration
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use tokio::sync::Notify;

    /// Test clock whose `await_round_end` only resolves once the test
    /// explicitly calls `advance()`, giving full control over round
    /// progression without real sleeps.
    pub struct ManualRoundClock {
        notify: Notify,
        round_duration: Duration,
    }

    impl ManualRoundClock {
        pub fn new() -> Self {
            Self {
                notify: Notify::new(),
                round_duration: Duration::from_millis(1),
            }
        }

        pub fn advance(&self) {
            self.notify.notify_one();
        }
    }

    impl Default for ManualRoundClock {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl RoundClock for ManualRoundClock {
        async fn await_wakeup(&self, _layer: Layer) {}

        async fn await_round_end(&self, _round: Round) {
            self.notify.notified().await;
        }

        fn round_duration(&self) -> Duration {
            self.round_duration
        }
    }
}
