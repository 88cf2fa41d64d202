//! Layer clock: maps epoch/layer ids to wall-clock instants and yields
//! "reached layer L" signals to the ATX builder and the hare orchestrator.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use common::{Epoch, Layer};

/// Narrow collaborator trait consumed by both pipelines. Kept minimal,
/// one-concern-per-trait, rather than a single fat "node services"
/// interface.
#[async_trait]
pub trait LayerClock: Send + Sync {
    /// The layer the wall clock is currently in.
    fn current_layer(&self) -> Layer;

    /// The instant a given layer starts.
    fn layer_to_time(&self, layer: Layer) -> SystemTime;

    /// Resolves once the wall clock reaches `layer`'s start. Resolves
    /// immediately if `layer` has already started.
    async fn await_layer(&self, layer: Layer);

    fn layers_per_epoch(&self) -> u32;

    fn current_epoch(&self) -> Epoch {
        self.current_layer().epoch(self.layers_per_epoch())
    }
}

/// A real-time clock driven off a genesis instant and a fixed layer
/// duration, the production implementation of [`LayerClock`].
#[derive(Clone)]
pub struct SystemLayerClock {
    genesis: SystemTime,
    layer_duration: Duration,
    layers_per_epoch: u32,
}

impl SystemLayerClock {
    pub fn new(genesis: SystemTime, layer_duration: Duration, layers_per_epoch: u32) -> Self {
        Self {
            genesis,
            layer_duration,
            layers_per_epoch,
        }
    }
}

#[async_trait]
impl LayerClock for SystemLayerClock {
    fn current_layer(&self) -> Layer {
        let elapsed = SystemTime::now()
            .duration_since(self.genesis)
            .unwrap_or_default();
        Layer::new((elapsed.as_secs_f64() / self.layer_duration.as_secs_f64()) as u32)
    }

    fn layer_to_time(&self, layer: Layer) -> SystemTime {
        self.genesis + self.layer_duration * layer.0
    }

    async fn await_layer(&self, layer: Layer) {
        let target = self.layer_to_time(layer);
        if let Ok(remaining) = target.duration_since(SystemTime::now()) {
            tokio::time::sleep(remaining).await;
        }
    }

    fn layers_per_epoch(&self) -> u32 {
        self.layers_per_epoch
    }
}
