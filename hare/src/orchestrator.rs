//! Orchestrates the per-layer Hare consensus pipeline: spawns one
//! [`ConsensusProcess`] per eligible layer tick, collects its output,
//! forwards malfeasance, and enforces the Hdist-bounded output buffer
//! and eviction policy. Three long-lived loops (`tick_loop`,
//! `output_collection_loop`, `malfeasance_loop`) are owned by a single
//! struct and cancelled together on shutdown, mirroring the
//! `ChainSyncer`/`ChainMuxer` pattern of modeling a multi-loop component
//! as one struct that owns child task handles and a single shutdown
//! path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use common::signing::EdSigner;
use common::{AtxProvider, Epoch, Layer, NodeId, Syncer};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::consensus::{ConsensusOutcome, ConsensusProcess, HareGossip};
use crate::good_proposals::{good_proposals, ProposalProvider};
use crate::identities::IdentitiesStore;
use crate::oracle::Oracle;
use crate::round_clock::RoundClock;
use crate::types::{MalfeasanceProof, Message, Set};
use crate::{Broker, Error, HareConfig};

/// Publish-only collaborator for the `malfeasance` gossip topic. Kept
/// separate from [`HareGossip`] because a consensus process never
/// produces malfeasance proofs itself — only the orchestrator does, once
/// it has seen one surface from any instance.
#[async_trait]
pub trait MalfeasanceGossip: Send + Sync {
    async fn broadcast_malfeasance(&self, proof: MalfeasanceProof) -> Result<(), Error>;
}

/// Resolves the epoch beacon the good-proposals filter compares against.
/// The real beacon protocol is out of scope; this is the narrow read
/// slice the orchestrator needs.
#[async_trait]
pub trait BeaconProvider: Send + Sync {
    async fn beacon(&self, epoch: Epoch) -> Option<common::Beacon>;
}

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub effective_genesis: Layer,
    pub layers_per_epoch: u32,
    pub hare: HareConfig,
}

struct CpHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct HareOrchestrator<O, G, R, Sy, Pp, Id, B, A> {
    cfg: OrchestratorConfig,
    signer: EdSigner,
    node_id: NodeId,

    broker: Arc<Broker<O, Sy>>,
    oracle: Arc<O>,
    gossip: Arc<G>,
    round_clock: Arc<R>,
    syncer: Arc<Sy>,
    proposals: Arc<Pp>,
    identities: Arc<Id>,
    beacons: Arc<B>,
    atx_provider: Arc<A>,

    cps: Mutex<HashMap<Layer, CpHandle>>,
    outputs: Mutex<HashMap<Layer, ConsensusOutcome>>,
    last_layer: Mutex<Layer>,

    output_tx: mpsc::Sender<ConsensusOutcome>,
    output_rx: Mutex<Option<mpsc::Receiver<ConsensusOutcome>>>,
    weak_coin_tx: mpsc::Sender<(Layer, u32, bool)>,
    weak_coin_rx: Mutex<Option<mpsc::Receiver<(Layer, u32, bool)>>>,
    malfeasance_tx: mpsc::Sender<MalfeasanceProof>,
    malfeasance_rx: Mutex<Option<mpsc::Receiver<MalfeasanceProof>>>,
    block_gen_tx: mpsc::Sender<(Layer, Set)>,

    metrics: Arc<crate::metrics::Metrics>,
}

impl<O, G, R, Sy, Pp, Id, B, A> HareOrchestrator<O, G, R, Sy, Pp, Id, B, A>
where
    O: Oracle + 'static,
    G: HareGossip + MalfeasanceGossip + 'static,
    R: RoundClock + 'static,
    Sy: Syncer + 'static,
    Pp: ProposalProvider + 'static,
    Id: IdentitiesStore + 'static,
    B: BeaconProvider + 'static,
    A: AtxProvider + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: OrchestratorConfig,
        signer: EdSigner,
        broker: Arc<Broker<O, Sy>>,
        oracle: Arc<O>,
        gossip: Arc<G>,
        round_clock: Arc<R>,
        syncer: Arc<Sy>,
        proposals: Arc<Pp>,
        identities: Arc<Id>,
        beacons: Arc<B>,
        atx_provider: Arc<A>,
        block_gen_tx: mpsc::Sender<(Layer, Set)>,
    ) -> Arc<Self> {
        let hdist = cfg.hare.hdist as usize;
        let (output_tx, output_rx) = mpsc::channel(hdist.max(1));
        let (weak_coin_tx, weak_coin_rx) = mpsc::channel(hdist.max(1));
        let (malfeasance_tx, malfeasance_rx) = mpsc::channel(hdist.max(1));
        let node_id = signer.node_id();
        Arc::new(Self {
            cfg,
            signer,
            node_id,
            broker,
            oracle,
            gossip,
            round_clock,
            syncer,
            proposals,
            identities,
            beacons,
            atx_provider,
            cps: Mutex::new(HashMap::new()),
            outputs: Mutex::new(HashMap::new()),
            last_layer: Mutex::new(Layer::new(0)),
            output_tx,
            output_rx: Mutex::new(Some(output_rx)),
            weak_coin_tx,
            weak_coin_rx: Mutex::new(Some(weak_coin_rx)),
            malfeasance_tx,
            malfeasance_rx: Mutex::new(Some(malfeasance_rx)),
            block_gen_tx,
            metrics: Arc::new(crate::metrics::Metrics::default()),
        })
    }

    pub fn metrics(&self) -> &crate::metrics::Metrics {
        &self.metrics
    }

    /// Drives the three structured loops under one cancellation token in a
    /// single `JoinSet`, the same "one struct, one shutdown path" pattern
    /// used elsewhere for multi-loop services: the caller spawns this
    /// future into its own service `JoinSet` rather than this type
    /// managing a detached task itself.
    pub async fn run(self: Arc<Self>, layer_clock: Arc<dyn clock::LayerClock>, cancel: CancellationToken) {
        let output_rx = self.output_rx.lock().await.take().expect("run() called more than once");
        let weak_coin_rx = self.weak_coin_rx.lock().await.take().expect("run() called more than once");
        let malfeasance_rx = self.malfeasance_rx.lock().await.take().expect("run() called more than once");

        let mut set = tokio::task::JoinSet::new();
        set.spawn(self.clone().tick_loop(layer_clock, cancel.clone()));
        set.spawn(self.clone().output_collection_loop(output_rx, weak_coin_rx, cancel.clone()));
        set.spawn(self.malfeasance_loop(malfeasance_rx, cancel));
        while set.join_next().await.is_some() {}
    }

    #[instrument(skip(self, layer_clock, cancel))]
    async fn tick_loop(self: Arc<Self>, layer_clock: Arc<dyn clock::LayerClock>, cancel: CancellationToken) {
        let mut layer = self.cfg.effective_genesis.add(1);
        loop {
            if cancel.is_cancelled() {
                return;
            }
            tokio::select! {
                _ = layer_clock.await_layer(layer) => {}
                _ = cancel.cancelled() => return,
            }

            let layer_start = layer_clock.layer_to_time(layer);
            let staleness = SystemTime::now().duration_since(layer_start).unwrap_or_default();
            if staleness > self.cfg.hare.wakeup_delta {
                warn!(layer = layer.0, "tick already stale, skipping");
            } else {
                self.on_tick(layer, &layer_clock, &cancel).await;
            }

            *self.last_layer.lock().await = layer;
            self.broker.clean_old_layers().await;
            layer = layer.add(1);
        }
    }

    #[instrument(skip(self, layer_clock, cancel), fields(layer = layer.0))]
    async fn on_tick(self: &Arc<Self>, layer: Layer, layer_clock: &Arc<dyn clock::LayerClock>, cancel: &CancellationToken) {
        if layer.0 <= self.cfg.effective_genesis.0 {
            return;
        }

        let identities = self.identities.clone();
        tokio::spawn(async move { identities.warm_active_cache(layer).await });

        self.round_clock.await_wakeup(layer).await;
        if cancel.is_cancelled() {
            return;
        }

        if !self.syncer.synced(layer) {
            return;
        }

        let epoch = layer.epoch(self.cfg.layers_per_epoch);
        let Some(beacon) = self.beacons.beacon(epoch).await else {
            return;
        };

        let own_tick_height = self
            .atx_provider
            .last_atx(self.node_id)
            .await
            .map(|h| h.tick_height)
            .unwrap_or(0);
        let epoch_start = layer_clock.layer_to_time(epoch.first_layer(self.cfg.layers_per_epoch));

        let ids = good_proposals(
            &*self.proposals,
            layer,
            own_tick_height,
            beacon,
            epoch_start,
            self.cfg.hare.network_delay,
        )
        .await;
        let initial_set = Set::new(ids);

        let mailbox = match self.broker.register(layer).await {
            Ok(mb) => mb,
            Err(e) => {
                warn!(layer = layer.0, error = %e, "could not register hare mailbox, skipping layer");
                return;
            }
        };

        let cp = ConsensusProcess::new(
            layer,
            self.signer.clone(),
            self.oracle.clone(),
            self.gossip.clone(),
            self.round_clock.clone(),
            self.cfg.hare.committee_size,
            self.cfg.hare.exp_leaders,
            self.cfg.hare.limit_iterations,
            mailbox,
            self.output_tx.clone(),
            self.weak_coin_tx.clone(),
            self.malfeasance_tx.clone(),
        );

        let cp_cancel = CancellationToken::new();
        let handle = tokio::spawn(cp.run(initial_set, cp_cancel.clone()));
        self.cps.lock().await.insert(
            layer,
            CpHandle {
                cancel: cp_cancel,
                task: handle,
            },
        );
        self.metrics.record_started();
        info!(layer = layer.0, "spawned consensus process");
    }

    async fn output_collection_loop(
        self: Arc<Self>,
        mut output_rx: mpsc::Receiver<ConsensusOutcome>,
        mut weak_coin_rx: mpsc::Receiver<(Layer, u32, bool)>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                maybe = output_rx.recv() => {
                    match maybe {
                        Some(outcome) => self.handle_outcome(outcome).await,
                        None => return,
                    }
                }
                maybe = weak_coin_rx.recv() => {
                    if maybe.is_none() {
                        return;
                    }
                }
            }
        }
    }

    /// Stores the outcome in the `Hdist`-bounded output map, forwards it
    /// to the block-gen channel if completed, then tears down the
    /// consensus process and its broker mailbox. `cp.stop` (cancel+join)
    /// happens outside the `cps` lock to avoid deadlocking with the
    /// consensus process's own output-side send.
    async fn handle_outcome(&self, outcome: ConsensusOutcome) {
        let layer = outcome.layer;
        {
            let mut outputs = self.outputs.lock().await;
            outputs.insert(layer, outcome.clone());
            let hdist = self.cfg.hare.hdist;
            if let Some(cutoff) = layer.0.checked_sub(hdist) {
                outputs.retain(|l, _| l.0 >= cutoff);
            }
        }

        if outcome.completed {
            self.metrics.record_completed();
            let _ = self.block_gen_tx.send((layer, outcome.set.clone())).await;
        } else {
            self.metrics.record_timed_out();
        }

        self.broker.unregister(layer).await;

        let handle = self.cps.lock().await.remove(&layer);
        if let Some(cp) = handle {
            cp.cancel.cancel();
            let _ = cp.task.await;
        }
    }

    async fn malfeasance_loop(self: Arc<Self>, mut rx: mpsc::Receiver<MalfeasanceProof>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                maybe = rx.recv() => {
                    match maybe {
                        Some(proof) => self.handle_malfeasance(proof).await,
                        None => return,
                    }
                }
            }
        }
    }

    async fn handle_malfeasance(&self, proof: MalfeasanceProof) {
        let Ok((m1, _m2)) = common::codec::decode::<(Message, Message)>(&proof.data) else {
            warn!("malfeasance proof data did not decode, dropping");
            return;
        };
        let node = m1.smesher_id();
        if let Err(e) = self
            .identities
            .save_malfeasance(node, proof.kind, proof.data.clone())
            .await
        {
            warn!(error = %e, "failed to persist malfeasance proof");
            return;
        }
        self.metrics.record_malfeasance();
        if let Err(e) = self.gossip.broadcast_malfeasance(proof).await {
            warn!(error = %e, "failed to broadcast malfeasance proof");
        }
    }

    /// Queried result for `layer`: `Ok` if a terminated or timed-out
    /// outcome is still buffered, `TooLate` if it has already aged out of
    /// the `Hdist` window, `NoResult` if the layer never produced one.
    pub async fn result(&self, layer: Layer) -> Result<Set, Error> {
        if let Some(outcome) = self.outputs.lock().await.get(&layer) {
            return Ok(outcome.set.clone());
        }
        let last = *self.last_layer.lock().await;
        if last.0.saturating_sub(layer.0) > self.cfg.hare.hdist {
            return Err(Error::TooLate);
        }
        Err(Error::NoResult)
    }

    pub async fn active_count(&self) -> usize {
        self.cps.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::fake::FakeHareGossip;
    use crate::good_proposals::fake::FakeProposalProvider;
    use crate::identities::fake::FakeIdentitiesStore;
    use crate::oracle::fake::FakeOracle;
    use crate::round_clock::fake::ManualRoundClock;
    use common::collab::fake::{FakeAtxProvider, FakeSyncer};
    use common::{AtxId, Beacon};
    use std::time::Duration as StdDuration;

    struct FakeBeaconProvider(Beacon);

    #[async_trait]
    impl BeaconProvider for FakeBeaconProvider {
        async fn beacon(&self, _epoch: Epoch) -> Option<Beacon> {
            Some(self.0)
        }
    }

    #[async_trait]
    impl MalfeasanceGossip for FakeHareGossip {
        async fn broadcast_malfeasance(&self, _proof: MalfeasanceProof) -> Result<(), Error> {
            Ok(())
        }
    }

    fn make_orchestrator() -> (
        Arc<
            HareOrchestrator<
                FakeOracle,
                FakeHareGossip,
                ManualRoundClock,
                FakeSyncer,
                FakeProposalProvider,
                FakeIdentitiesStore,
                FakeBeaconProvider,
                FakeAtxProvider,
            >,
        >,
        mpsc::Receiver<(Layer, Set)>,
    ) {
        let oracle = Arc::new(FakeOracle::new());
        let syncer = Arc::new(FakeSyncer::new(true));
        let broker = Broker::new(oracle.clone(), syncer.clone(), NodeId::from([0u8; 32]), HareConfig::default());
        let gossip = Arc::new(FakeHareGossip::new());
        let round_clock = Arc::new(ManualRoundClock::new());
        let proposals = Arc::new(FakeProposalProvider::new());
        let identities = Arc::new(FakeIdentitiesStore::new());
        let beacons = Arc::new(FakeBeaconProvider(Beacon([1; 4])));
        let atx_provider = Arc::new(FakeAtxProvider::new(AtxId::zero()));
        let (block_gen_tx, block_gen_rx) = mpsc::channel(16);

        let cfg = OrchestratorConfig {
            effective_genesis: Layer::new(0),
            layers_per_epoch: 4,
            hare: HareConfig {
                limit_iterations: 0,
                network_delay: StdDuration::from_secs(1),
                ..HareConfig::default()
            },
        };

        let orchestrator = HareOrchestrator::new(
            cfg,
            common::signing::EdSigner::generate(),
            broker,
            oracle,
            gossip,
            round_clock,
            syncer,
            proposals,
            identities,
            beacons,
            atx_provider,
            block_gen_tx,
        );
        (orchestrator, block_gen_rx)
    }

    #[tokio::test]
    async fn result_of_unknown_future_layer_is_no_result() {
        let (orchestrator, _rx) = make_orchestrator();
        let err = orchestrator.result(Layer::new(50)).await.unwrap_err();
        assert!(matches!(err, Error::NoResult));
    }

    #[tokio::test]
    async fn result_of_aged_out_layer_is_too_late() {
        let (orchestrator, _rx) = make_orchestrator();
        *orchestrator.last_layer.lock().await = Layer::new(100);
        let err = orchestrator.result(Layer::new(1)).await.unwrap_err();
        assert!(matches!(err, Error::TooLate));
    }

    #[tokio::test]
    async fn on_tick_spawns_a_consensus_process_and_registers_broker() {
        let (orchestrator, mut block_gen_rx) = make_orchestrator();
        let cancel = CancellationToken::new();
        let layer_clock: Arc<dyn clock::LayerClock> = Arc::new(clock::SystemLayerClock::new(
            std::time::SystemTime::now(),
            StdDuration::from_secs(1),
            4,
        ));

        orchestrator.clone().on_tick(Layer::new(1), &layer_clock, &cancel).await;
        assert_eq!(orchestrator.active_count().await, 1);

        // `on_tick` alone never starts `output_collection_loop` — that's
        // `run`'s job — so without driving it here nothing ever calls
        // `handle_outcome`, the only path that removes the layer from
        // `cps`. Take the channels out the same way `run` does and spawn
        // the loop ourselves.
        let output_rx = orchestrator.output_rx.lock().await.take().unwrap();
        let weak_coin_rx = orchestrator.weak_coin_rx.lock().await.take().unwrap();
        let output_loop = tokio::spawn(
            orchestrator
                .clone()
                .output_collection_loop(output_rx, weak_coin_rx, cancel.clone()),
        );

        // Drive the ManualRoundClock so the spawned process's preround
        // (the only round, since limit_iterations=0) ends immediately.
        // `on_tick` already completed the async `await_wakeup` (a no-op
        // for ManualRoundClock), so only `await_round_end` is pending.
        // Nothing else to drive: FakeOracle grants eligibility to
        // everyone, so the process broadcasts once then awaits round end.
        orchestrator.round_clock.advance();

        let outcome = tokio::time::timeout(StdDuration::from_secs(2), async {
            loop {
                if orchestrator.active_count().await == 0 {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await;
        assert!(outcome.is_ok(), "consensus process never finished");
        let _ = block_gen_rx.try_recv();

        cancel.cancel();
        let _ = output_loop.await;
    }
}
