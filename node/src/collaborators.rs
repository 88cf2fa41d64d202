//! Stand-in collaborator implementations wiring the node binary together.
//!
//! This binary's job is to run the ATX builder and the Hare orchestrator;
//! the gossip transport, the SQLite-backed identities/ATX stores, the
//! real PoST prover and the real PoET RPC client remain out of scope —
//! they're external collaborators specified only by the traits the core
//! crates consume. Until a real implementation is wired in, this module
//! provides the narrowest honest placeholder for each: gossip loops
//! published bytes straight back into the local atx-handler/atx-provider
//! (there being no transport to carry them anywhere else), other stores
//! are in-memory, the beacon is fixed by config. None of this is test
//! code — it runs in the shipped binary — but none of it is a production
//! store or transport either.

use std::sync::Arc;

use async_trait::async_trait;
use common::collab::fake::{FakeAtxProvider, FakeSyncer};
use common::{AtxHeader, Beacon};
use hare::consensus::HareGossip;
use hare::orchestrator::{BeaconProvider, MalfeasanceGossip};
use hare::{Error as HareError, MalfeasanceProof, Message};
use tracing::info;

use activation::atx_handler::fake::FakeAtxHandler;

/// Publishes to the `atx`, `hare` and `malfeasance` topics by logging. For
/// `atx` specifically, since there is no transport to carry the bytes to
/// any peer, the publish is looped back into this node's own
/// [`FakeAtxHandler`]/[`FakeAtxProvider`] — the same outcome a real
/// gossip round-trip would produce for a lone node, and what lets the
/// builder complete an epoch instead of always hitting
/// `ATXChallengeExpired` waiting for an ATX nothing will ever deliver.
pub struct LoggingGossip {
    atx_handler: Arc<FakeAtxHandler>,
    atx_provider: Arc<FakeAtxProvider>,
}

impl LoggingGossip {
    pub fn new(atx_handler: Arc<FakeAtxHandler>, atx_provider: Arc<FakeAtxProvider>) -> Self {
        Self {
            atx_handler,
            atx_provider,
        }
    }
}

#[async_trait]
impl activation::AtxGossip for LoggingGossip {
    async fn publish(&self, encoded_atx: Vec<u8>) -> Result<(), activation::Error> {
        info!(bytes = encoded_atx.len(), "publish atx (looped back, no transport wired)");
        let atx: activation::ActivationTx = common::codec::decode(&encoded_atx)?;
        let sequence = match &atx.inner.challenge.kind {
            activation::ChallengeKind::Initial { .. } => 0,
            activation::ChallengeKind::Subsequent { sequence, .. } => *sequence,
        };
        self.atx_provider.insert(AtxHeader {
            id: atx.id,
            node_id: atx.smesher_id,
            publish_epoch: atx.inner.challenge.publish_epoch,
            sequence,
            tick_height: sequence,
        });
        self.atx_handler.announce(atx.id);
        Ok(())
    }
}

#[async_trait]
impl HareGossip for LoggingGossip {
    async fn broadcast(&self, msg: Message) -> Result<(), HareError> {
        info!(round = msg.inner.round, "broadcast hare message (no transport wired)");
        Ok(())
    }
}

#[async_trait]
impl MalfeasanceGossip for LoggingGossip {
    async fn broadcast_malfeasance(&self, proof: MalfeasanceProof) -> Result<(), HareError> {
        info!(layer = proof.layer.0, kind = ?proof.kind, "broadcast malfeasance proof (no transport wired)");
        Ok(())
    }
}

/// Beacon provider backed by a single configured value. The real beacon
/// protocol computes a fresh value per epoch from VRF-weighted voting;
/// out of scope here.
pub struct FixedBeaconProvider(pub Beacon);

#[async_trait]
impl BeaconProvider for FixedBeaconProvider {
    async fn beacon(&self, _epoch: common::Epoch) -> Option<Beacon> {
        Some(self.0)
    }
}

/// Bundles the collaborator handles this binary constructs so `main`
/// doesn't have to name each generic parameter inline.
pub struct Collaborators {
    pub gossip: Arc<LoggingGossip>,
    pub beacons: Arc<FixedBeaconProvider>,
    pub syncer: Arc<common::collab::fake::FakeSyncer>,
    pub atx_provider: Arc<common::collab::fake::FakeAtxProvider>,
    pub atx_handler: Arc<activation::atx_handler::fake::FakeAtxHandler>,
    pub prover: Arc<post::fake::FakeProver>,
    pub oracle: Arc<hare::oracle::fake::FakeOracle>,
    pub identities: Arc<hare::identities::fake::FakeIdentitiesStore>,
    pub proposals: Arc<hare::good_proposals::fake::FakeProposalProvider>,
}

impl Collaborators {
    pub fn new(beacon: Beacon, golden_atx: common::AtxId) -> Self {
        let atx_provider = Arc::new(FakeAtxProvider::new(golden_atx));
        let atx_handler = Arc::new(FakeAtxHandler::new());
        Self {
            gossip: Arc::new(LoggingGossip::new(atx_handler.clone(), atx_provider.clone())),
            beacons: Arc::new(FixedBeaconProvider(beacon)),
            syncer: Arc::new(FakeSyncer::new(true)),
            atx_provider,
            atx_handler,
            prover: Arc::new(post::fake::FakeProver::new(None)),
            oracle: Arc::new(hare::oracle::fake::FakeOracle::new()),
            identities: Arc::new(hare::identities::fake::FakeIdentitiesStore::new()),
            proposals: Arc::new(hare::good_proposals::fake::FakeProposalProvider::new()),
        }
    }
}
