//! Component G: routes validated gossip messages to per-layer consumers.
//!
//! `handle_message` is the fast gossip-validator hook: it decodes and
//! checks the signature, rejects obviously stale-and-unregistered
//! traffic inline, and otherwise enqueues onto an internal two-level
//! priority queue. A single background task drains that queue, doing
//! the heavier classification (registration race, early buffering, sync
//! predicate, eligibility) and delivery into the per-layer mailbox.

use std::collections::HashMap;
use std::sync::Arc;

use common::{Layer, NodeId, Syncer};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::HareConfig;
use crate::metrics::Metrics;
use crate::oracle::Oracle;
use crate::types::{Message, Msg};
use crate::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Ignore,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SyncState {
    PendingValid,
    Invalid,
}

struct BrokerState {
    mailboxes: HashMap<Layer, mpsc::Sender<Msg>>,
    pending: HashMap<Layer, Vec<Msg>>,
    sync_state: HashMap<Layer, SyncState>,
    latest_layer: Layer,
}

const MAILBOX_CAPACITY: usize = 1024;

pub struct Broker<O, Sy> {
    oracle: Arc<O>,
    syncer: Arc<Sy>,
    local_peer: NodeId,
    committee_size: u16,
    limit_concurrent: usize,
    early_cap: usize,
    hdist: u32,

    high_tx: mpsc::UnboundedSender<Msg>,
    low_tx: mpsc::UnboundedSender<Msg>,
    high_rx: Mutex<mpsc::UnboundedReceiver<Msg>>,
    low_rx: Mutex<mpsc::UnboundedReceiver<Msg>>,

    state: Mutex<BrokerState>,
    metrics: Arc<Metrics>,
}

impl<O, Sy> Broker<O, Sy>
where
    O: Oracle + 'static,
    Sy: Syncer + 'static,
{
    pub fn new(oracle: Arc<O>, syncer: Arc<Sy>, local_peer: NodeId, cfg: HareConfig) -> Arc<Self> {
        let (high_tx, high_rx) = mpsc::unbounded_channel();
        let (low_tx, low_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            oracle,
            syncer,
            local_peer,
            committee_size: cfg.committee_size,
            limit_concurrent: cfg.limit_concurrent,
            early_cap: 64,
            hdist: cfg.hdist,
            high_tx,
            low_tx,
            high_rx: Mutex::new(high_rx),
            low_rx: Mutex::new(low_rx),
            state: Mutex::new(BrokerState {
                mailboxes: HashMap::new(),
                pending: HashMap::new(),
                sync_state: HashMap::new(),
                latest_layer: Layer::new(0),
            }),
            metrics: Arc::new(Metrics::default()),
        })
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Creates the mailbox for `layer` if absent, replaying any buffered
    /// early messages into it. Evicts the numerically smallest active
    /// layer first if already at `limit_concurrent`.
    pub async fn register(&self, layer: Layer) -> Result<mpsc::Receiver<Msg>, Error> {
        let mut state = self.state.lock().await;
        if state.sync_state.get(&layer) == Some(&SyncState::Invalid) {
            return Err(Error::NotSynced);
        }
        state.latest_layer = state.latest_layer.max(layer);

        if !state.mailboxes.contains_key(&layer) && state.mailboxes.len() >= self.limit_concurrent {
            if let Some(oldest) = state.mailboxes.keys().copied().min() {
                state.mailboxes.remove(&oldest);
                self.metrics.record_evicted();
            }
        }

        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        state.mailboxes.insert(layer, tx.clone());
        let buffered = state.pending.remove(&layer).unwrap_or_default();
        drop(state);

        for msg in buffered {
            if tx.send(msg).await.is_err() {
                break;
            }
        }
        self.metrics.record_started();
        Ok(rx)
    }

    pub async fn unregister(&self, layer: Layer) {
        let mut state = self.state.lock().await;
        state.mailboxes.remove(&layer);
    }

    /// Memoized sync verdict for `layer`, consulting the injected
    /// syncer only on first observation.
    pub async fn synced(&self, layer: Layer) -> bool {
        let mut state = self.state.lock().await;
        if let Some(s) = state.sync_state.get(&layer) {
            return *s != SyncState::Invalid;
        }
        let ok = self.syncer.synced(layer);
        state.sync_state.insert(
            layer,
            if ok { SyncState::PendingValid } else { SyncState::Invalid },
        );
        ok
    }

    /// Drops `sync_state`/`pending` entries older than `latest_layer - hdist`.
    pub async fn clean_old_layers(&self) {
        let mut state = self.state.lock().await;
        let Some(cutoff) = state.latest_layer.0.checked_sub(self.hdist) else {
            return;
        };
        state.sync_state.retain(|l, _| l.0 >= cutoff);
        state.pending.retain(|l, _| l.0 >= cutoff);
    }

    /// Decode, verify, and fast-path reject; otherwise enqueue by
    /// priority (self-originated messages are high priority).
    pub async fn handle_message(&self, peer: NodeId, bytes: &[u8]) -> Verdict {
        let message: Message = match common::codec::decode(bytes) {
            Ok(m) => m,
            Err(_) => {
                self.metrics.record_ignored();
                return Verdict::Ignore;
            }
        };
        let msg = match message.validate() {
            Some(m) => m,
            None => {
                self.metrics.record_ignored();
                return Verdict::Ignore;
            }
        };

        let layer = msg.layer();
        {
            let state = self.state.lock().await;
            if layer < state.latest_layer && !state.mailboxes.contains_key(&layer) {
                drop(state);
                self.metrics.record_ignored();
                return Verdict::Ignore;
            }
        }

        let tx = if peer == self.local_peer { &self.high_tx } else { &self.low_tx };
        if tx.send(msg).is_err() {
            self.metrics.record_ignored();
            return Verdict::Ignore;
        }
        Verdict::Accept
    }

    /// Background dequeue loop. High-priority items are always drained
    /// before low-priority ones.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut high = self.high_rx.lock().await;
        let mut low = self.low_rx.lock().await;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                Some(msg) = high.recv() => self.process(msg).await,
                Some(msg) = low.recv() => self.process(msg).await,
                else => return,
            }
        }
    }

    async fn process(&self, msg: Msg) {
        let layer = msg.layer();
        let mailbox = {
            let mut state = self.state.lock().await;
            state.latest_layer = state.latest_layer.max(layer);
            let latest = state.latest_layer;

            if layer < latest {
                match state.mailboxes.get(&layer) {
                    Some(tx) => tx.clone(),
                    None => {
                        self.metrics.record_ignored();
                        return;
                    }
                }
            } else if layer == latest {
                match state.mailboxes.get(&layer) {
                    Some(tx) => tx.clone(),
                    None => {
                        state.pending.entry(layer).or_default().push(msg);
                        return;
                    }
                }
            } else if layer == latest.add(1) {
                let buf = state.pending.entry(layer).or_default();
                if buf.len() < self.early_cap {
                    buf.push(msg);
                } else {
                    warn!(layer = layer.0, "early message buffer full, dropping");
                }
                return;
            } else {
                self.metrics.record_ignored();
                return;
            }
        };

        if !self.synced(layer).await {
            let mut state = self.state.lock().await;
            state.mailboxes.remove(&layer);
            return;
        }

        let round = msg.round();
        let vrf = msg.inner.role_proof.clone();
        let eligible = self
            .oracle
            .validate(layer, round, self.committee_size, msg.smesher, &vrf, 1)
            .await;
        if !eligible {
            self.metrics.record_ignored();
            return;
        }

        let _ = mailbox.send(msg).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::fake::FakeOracle;
    use crate::types::{MessageInner, Set};
    use async_trait::async_trait;
    use common::collab::fake::FakeSyncer;
    use common::{ProposalId, VrfSignature};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    fn pid(b: u8) -> ProposalId {
        ProposalId([b; 32])
    }

    fn signed(layer: Layer, id: ProposalId, signer: &common::signing::EdSigner) -> Vec<u8> {
        let inner = MessageInner {
            instance_id: layer,
            round: 0,
            role_proof: VrfSignature(vec![]),
            values: Set::new(vec![id]),
            svp: None,
            cert: None,
        };
        let msg = Message::sign_and_finalize(inner, signer).unwrap();
        common::codec::encode(&msg).unwrap()
    }

    struct GatedOracle {
        inner: FakeOracle,
        gate: Notify,
        first: AtomicBool,
    }

    impl GatedOracle {
        fn new() -> Self {
            Self {
                inner: FakeOracle::new(),
                gate: Notify::new(),
                first: AtomicBool::new(true),
            }
        }

        fn release(&self) {
            self.gate.notify_one();
        }
    }

    #[async_trait]
    impl Oracle for GatedOracle {
        async fn validate(
            &self,
            layer: Layer,
            round: crate::types::Round,
            committee: u16,
            id: NodeId,
            vrf: &VrfSignature,
            count: u16,
        ) -> bool {
            if self.first.swap(false, Ordering::SeqCst) {
                self.gate.notified().await;
            }
            self.inner.validate(layer, round, committee, id, vrf, count).await
        }

        async fn calc_eligibility(
            &self,
            layer: Layer,
            round: crate::types::Round,
            committee: u16,
            id: NodeId,
            vrf: &VrfSignature,
        ) -> u16 {
            self.inner.calc_eligibility(layer, round, committee, id, vrf).await
        }

        async fn proof(&self, layer: Layer, round: crate::types::Round) -> VrfSignature {
            self.inner.proof(layer, round).await
        }
    }

    #[tokio::test]
    async fn s3_self_originated_messages_jump_the_queue() {
        let oracle = Arc::new(GatedOracle::new());
        let syncer = Arc::new(FakeSyncer::new(true));
        let local = common::signing::EdSigner::generate();
        let remote = common::signing::EdSigner::generate();
        let local_peer = local.node_id();

        let broker = Broker::new(oracle.clone(), syncer, local_peer, HareConfig::default());
        let layer = Layer::new(1);
        let mut mailbox = broker.register(layer).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(broker.clone().run(cancel.clone()));

        for i in 1..=10u8 {
            let bytes = signed(layer, pid(100 + i), &remote);
            assert_eq!(broker.handle_message(remote.node_id(), &bytes).await, Verdict::Accept);
        }
        let out_bytes = signed(layer, pid(200), &local);
        assert_eq!(broker.handle_message(local_peer, &out_bytes).await, Verdict::Accept);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        oracle.release();

        let mut order = Vec::new();
        for _ in 0..11 {
            let msg = mailbox.recv().await.unwrap();
            order.push(msg.inner.values.ids()[0]);
        }

        assert_eq!(order[0], pid(101));
        assert_eq!(order[1], pid(200));
        assert_eq!(&order[2..], &[
            pid(102), pid(103), pid(104), pid(105), pid(106), pid(107), pid(108), pid(109), pid(110)
        ]);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn s4_eviction_drops_oldest_layer() {
        let oracle = Arc::new(FakeOracle::new());
        let syncer = Arc::new(FakeSyncer::new(true));
        let signer = common::signing::EdSigner::generate();
        let local_peer = signer.node_id();

        let mut cfg = HareConfig::default();
        cfg.limit_concurrent = 4;
        let broker = Broker::new(oracle, syncer, local_peer, cfg);

        for l in 1..=4u32 {
            broker.register(Layer::new(l)).await.unwrap();
        }
        let mut mailbox5 = broker.register(Layer::new(5)).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(broker.clone().run(cancel.clone()));

        let bytes5 = signed(Layer::new(5), pid(1), &signer);
        assert_eq!(broker.handle_message(local_peer, &bytes5).await, Verdict::Accept);
        let received = mailbox5.recv().await.unwrap();
        assert_eq!(received.inner.values.ids()[0], pid(1));

        let bytes1 = signed(Layer::new(1), pid(2), &signer);
        assert_eq!(broker.handle_message(local_peer, &bytes1).await, Verdict::Ignore);

        cancel.cancel();
        handle.await.unwrap();
    }
}
