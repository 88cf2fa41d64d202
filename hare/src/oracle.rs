//! Eligibility oracle: the VRF-backed committee/leader selection the
//! consensus process consults before emitting any message. The real
//! implementation weighs active ATXs and the epoch beacon; this crate
//! only shapes the contract it's consumed through.

use async_trait::async_trait;
use common::{Layer, NodeId, VrfSignature};

use crate::types::Round;

#[async_trait]
pub trait Oracle: Send + Sync {
    /// Whether `id` is eligible to send `count` copies of a message at
    /// `(layer, round)` given `vrf`, for a committee of `committee` size.
    async fn validate(
        &self,
        layer: Layer,
        round: Round,
        committee: u16,
        id: NodeId,
        vrf: &VrfSignature,
        count: u16,
    ) -> bool;

    /// How many times `id` may act at `(layer, round)`; zero means not
    /// eligible at all for this round.
    async fn calc_eligibility(
        &self,
        layer: Layer,
        round: Round,
        committee: u16,
        id: NodeId,
        vrf: &VrfSignature,
    ) -> u16;

    /// This node's own VRF proof for `(layer, round)`.
    async fn proof(&self, layer: Layer, round: Round) -> VrfSignature;
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Hand-written fake: eligibility counts are set explicitly per
    /// `(layer, round, id)` by the test, defaulting to 1 for any id not
    /// configured, so most tests don't need to set anything up.
    #[derive(Default)]
    pub struct FakeOracle {
        counts: Mutex<HashMap<(Layer, Round, NodeId), u16>>,
    }

    impl FakeOracle {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_eligibility(&self, layer: Layer, round: Round, id: NodeId, count: u16) {
            self.counts.lock().unwrap().insert((layer, round, id), count);
        }
    }

    #[async_trait]
    impl Oracle for FakeOracle {
        async fn validate(
            &self,
            layer: Layer,
            round: Round,
            _committee: u16,
            id: NodeId,
            _vrf: &VrfSignature,
            count: u16,
        ) -> bool {
            self.calc_eligibility(layer, round, _committee, id, _vrf).await >= count && count > 0
        }

        async fn calc_eligibility(
            &self,
            layer: Layer,
            round: Round,
            _committee: u16,
            id: NodeId,
            _vrf: &VrfSignature,
        ) -> u16 {
            *self.counts.lock().unwrap().get(&(layer, round, id)).unwrap_or(&1)
        }

        async fn proof(&self, _layer: Layer, _round: Round) -> VrfSignature {
            VrfSignature(vec![0u8; 8])
        }
    }
}
