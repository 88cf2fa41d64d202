//! Component H: one round-based agreement instance for a single layer,
//! abstracted from the classical Hare algorithm. Rounds are chained as
//! `preround`, then iterations of `{status, proposal, commit, notify}`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use common::signing::EdSigner;
use common::{Layer, NodeId, ProposalId};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::oracle::Oracle;
use crate::round_clock::RoundClock;
use crate::types::{
    round_kind, AggregateProof, MalfeasanceKind, MalfeasanceProof, Message, MessageInner, Msg,
    Round, RoundKind, Set,
};
use crate::Error;

/// Publishes a signed hare message on the gossip topic. Separate from
/// [`crate::broker::Broker`]'s consumption side: a process only ever
/// produces on this trait, never reads from it.
#[async_trait]
pub trait HareGossip: Send + Sync {
    async fn broadcast(&self, msg: Message) -> Result<(), Error>;
}

#[derive(Clone, Debug)]
pub struct ConsensusOutcome {
    pub layer: Layer,
    pub completed: bool,
    pub set: Set,
}

pub struct ConsensusProcess<O, G, R> {
    layer: Layer,
    self_id: NodeId,
    signer: EdSigner,
    oracle: Arc<O>,
    gossip: Arc<G>,
    round_clock: Arc<R>,
    committee_size: u16,
    exp_leaders: u16,
    limit_iterations: u32,
    mailbox: Mutex<mpsc::Receiver<Msg>>,
    output_tx: mpsc::Sender<ConsensusOutcome>,
    weak_coin_tx: mpsc::Sender<(Layer, u32, bool)>,
    malfeasance_tx: mpsc::Sender<MalfeasanceProof>,
    seen: Mutex<HashMap<(Round, NodeId), (Msg, [u8; 32])>>,
}

impl<O, G, R> ConsensusProcess<O, G, R>
where
    O: Oracle + 'static,
    G: HareGossip + 'static,
    R: RoundClock + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        layer: Layer,
        signer: EdSigner,
        oracle: Arc<O>,
        gossip: Arc<G>,
        round_clock: Arc<R>,
        committee_size: u16,
        exp_leaders: u16,
        limit_iterations: u32,
        mailbox: mpsc::Receiver<Msg>,
        output_tx: mpsc::Sender<ConsensusOutcome>,
        weak_coin_tx: mpsc::Sender<(Layer, u32, bool)>,
        malfeasance_tx: mpsc::Sender<MalfeasanceProof>,
    ) -> Arc<Self> {
        Arc::new(Self {
            layer,
            self_id: signer.node_id(),
            signer,
            oracle,
            gossip,
            round_clock,
            committee_size,
            exp_leaders,
            limit_iterations,
            mailbox: Mutex::new(mailbox),
            output_tx,
            weak_coin_tx,
            malfeasance_tx,
            seen: Mutex::new(HashMap::new()),
        })
    }

    #[instrument(skip(self, initial_set, cancel), fields(layer = self.layer.0))]
    pub async fn run(self: Arc<Self>, initial_set: Set, cancel: CancellationToken) {
        self.round_clock.await_wakeup(self.layer).await;

        self.broadcast(0, initial_set.clone(), None, None).await;
        let preround_msgs = self.collect_round(0, &cancel).await;
        let mut current = self.filter_by_support(&initial_set, &preround_msgs);

        for iter in 0..self.limit_iterations {
            if cancel.is_cancelled() {
                return;
            }

            let status_round = 4 * iter + 1;
            self.broadcast(status_round, current.clone(), None, None).await;
            let statuses = self.collect_round(status_round, &cancel).await;

            let proposal_round = 4 * iter + 2;
            if self.check_eligibility(proposal_round, self.exp_leaders).await {
                let svp = AggregateProof(statuses.iter().map(Msg::to_message).collect());
                let candidate = self.pick_candidate(&statuses, &current);
                self.broadcast(proposal_round, candidate, Some(svp), None).await;
            }
            let proposals = self.collect_round(proposal_round, &cancel).await;

            let commit_round = 4 * iter + 3;
            if let Some(proposal) = proposals.first() {
                if self.consistent(&proposal.inner.values, &current) {
                    self.broadcast(commit_round, proposal.inner.values.clone(), None, None).await;
                }
            }
            let commits = self.collect_round(commit_round, &cancel).await;

            let notify_round = 4 * iter + 4;
            let threshold = 2 * (self.committee_size as usize / 3) + 1;
            let committed = commits.len() >= threshold && proposals.first().is_some();
            if committed {
                let winner = proposals.first().expect("checked above").inner.values.clone();
                current = winner;
                let cert = AggregateProof(commits.iter().map(Msg::to_message).collect());
                self.broadcast(notify_round, current.clone(), None, Some(cert)).await;
            }
            let notifies = self.collect_round(notify_round, &cancel).await;
            let _ = self.weak_coin_tx.try_send((self.layer, iter, iter % 2 == 0));

            if committed {
                info!(iteration = iter, "consensus committed locally");
                self.send_outcome(ConsensusOutcome {
                    layer: self.layer,
                    completed: true,
                    set: current,
                });
                return;
            }
            if let Some(notify) = notifies.iter().find(|m| m.inner.cert.is_some()) {
                self.send_outcome(ConsensusOutcome {
                    layer: self.layer,
                    completed: true,
                    set: notify.inner.values.clone(),
                });
                return;
            }
        }

        self.send_outcome(ConsensusOutcome {
            layer: self.layer,
            completed: false,
            set: current,
        });
    }

    /// Non-blocking report: a stalled orchestrator output loop must never
    /// block the consensus process. Saturation is dropped with an
    /// error-level log, matching `weak_coin_tx`/`malfeasance_tx`.
    fn send_outcome(&self, outcome: ConsensusOutcome) {
        if self.output_tx.try_send(outcome).is_err() {
            tracing::error!(layer = self.layer.0, "output channel saturated, dropping consensus outcome");
        }
    }

    fn committee_for(&self, round: Round) -> u16 {
        match round_kind(round) {
            RoundKind::Proposal => self.exp_leaders,
            _ => self.committee_size,
        }
    }

    async fn check_eligibility(&self, round: Round, committee: u16) -> bool {
        let vrf = self.oracle.proof(self.layer, round).await;
        let count = self
            .oracle
            .calc_eligibility(self.layer, round, committee, self.self_id, &vrf)
            .await;
        count > 0
    }

    async fn broadcast(&self, round: Round, values: Set, svp: Option<AggregateProof>, cert: Option<AggregateProof>) {
        let committee = self.committee_for(round);
        if !self.check_eligibility(round, committee).await {
            return;
        }
        let vrf = self.oracle.proof(self.layer, round).await;
        let inner = MessageInner {
            instance_id: self.layer,
            round,
            role_proof: vrf,
            values,
            svp,
            cert,
        };
        match Message::sign_and_finalize(inner, &self.signer) {
            Ok(msg) => {
                if let Err(e) = self.gossip.broadcast(msg).await {
                    warn!(error = %e, round, "failed to broadcast hare message");
                }
            }
            Err(e) => warn!(error = %e, round, "failed to encode hare message"),
        }
    }

    /// Drains the mailbox for messages belonging to `round` until the
    /// round clock or cancellation fires. Messages for any other round
    /// are dropped; the broker has already confirmed layer membership.
    async fn collect_round(&self, round: Round, cancel: &CancellationToken) -> Vec<Msg> {
        let mut mailbox = self.mailbox.lock().await;
        let mut collected = Vec::new();
        let deadline = self.round_clock.await_round_end(round);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = &mut deadline => break,
                maybe = mailbox.recv() => {
                    match maybe {
                        Some(msg) if msg.round() == round => {
                            self.record_and_check_equivocation(&msg).await;
                            collected.push(msg);
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
            }
        }
        collected
    }

    async fn record_and_check_equivocation(&self, msg: &Msg) {
        let key = (msg.round(), msg.smesher);
        let hash = msg.payload_hash();
        let mut seen = self.seen.lock().await;
        match seen.get(&key) {
            None => {
                seen.insert(key, (msg.clone(), hash));
            }
            Some((prev_msg, prev_hash)) if *prev_hash != hash => {
                let data = common::codec::encode(&(prev_msg.to_message(), msg.to_message())).unwrap_or_default();
                drop(seen);
                let proof = MalfeasanceProof {
                    layer: self.layer,
                    kind: MalfeasanceKind::HareEquivocation,
                    data,
                };
                if self.malfeasance_tx.try_send(proof).is_err() {
                    warn!(smesher = %msg.smesher, "malfeasance channel saturated, dropping proof");
                }
            }
            Some(_) => {}
        }
    }

    /// Values supported by at least `f+1` distinct senders (including
    /// this node's own vote for its initial set), where `f` is the
    /// maximum tolerated faulty count for `committee_size`.
    fn filter_by_support(&self, current: &Set, msgs: &[Msg]) -> Set {
        let f = (self.committee_size as usize).saturating_sub(1) / 3;
        let threshold = f + 1;
        let mut support: HashMap<ProposalId, HashSet<NodeId>> = HashMap::new();
        for id in current.ids() {
            support.entry(*id).or_default().insert(self.self_id);
        }
        for msg in msgs {
            for id in msg.inner.values.ids() {
                support.entry(*id).or_default().insert(msg.smesher);
            }
        }
        let kept: Vec<ProposalId> = support
            .into_iter()
            .filter(|(_, senders)| senders.len() >= threshold)
            .map(|(id, _)| id)
            .collect();
        Set::new(kept)
    }

    fn pick_candidate(&self, statuses: &[Msg], fallback: &Set) -> Set {
        if statuses.is_empty() {
            return fallback.clone();
        }
        statuses.iter().fold(Set::empty(), |acc, m| acc.union(&m.inner.values))
    }

    fn consistent(&self, proposal: &Set, current: &Set) -> bool {
        current.is_empty() || !proposal.intersection(current).is_empty()
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    pub struct FakeHareGossip {
        pub sent: StdMutex<Vec<Message>>,
    }

    impl FakeHareGossip {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn last(&self) -> Option<Message> {
            self.sent.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl HareGossip for FakeHareGossip {
        async fn broadcast(&self, msg: Message) -> Result<(), Error> {
            self.sent.lock().unwrap().push(msg);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::fake::FakeOracle;
    use crate::round_clock::fake::ManualRoundClock;
    use crate::types::Set;
    use fake::FakeHareGossip;
    use std::time::Duration;

    fn pid(b: u8) -> ProposalId {
        ProposalId([b; 32])
    }

    fn make_cp(
        committee_size: u16,
        limit_iterations: u32,
    ) -> (
        Arc<ConsensusProcess<FakeOracle, FakeHareGossip, ManualRoundClock>>,
        mpsc::Sender<Msg>,
        mpsc::Receiver<ConsensusOutcome>,
        mpsc::Receiver<MalfeasanceProof>,
    ) {
        let signer = EdSigner::generate();
        let oracle = Arc::new(FakeOracle::new());
        let gossip = Arc::new(FakeHareGossip::new());
        let round_clock = Arc::new(ManualRoundClock::new());
        let (in_tx, in_rx) = mpsc::channel(64);
        let (out_tx, out_rx) = mpsc::channel(4);
        let (coin_tx, _coin_rx) = mpsc::channel(16);
        let (mal_tx, mal_rx) = mpsc::channel(16);

        let cp = ConsensusProcess::new(
            Layer::new(1),
            signer,
            oracle,
            gossip,
            round_clock,
            committee_size,
            1,
            limit_iterations,
            in_rx,
            out_tx,
            coin_tx,
            mal_tx,
        );
        (cp, in_tx, out_rx, mal_rx)
    }

    #[tokio::test]
    async fn equivocation_produces_exactly_one_proof_for_two_distinct_payloads() {
        let (cp, _in_tx, _out_rx, mut mal_rx) = make_cp(4, 1);
        let signer = EdSigner::generate();

        let mk = |round: Round| {
            Message::sign_and_finalize(
                MessageInner {
                    instance_id: Layer::new(1),
                    round,
                    role_proof: common::VrfSignature(vec![]),
                    values: Set::new(vec![pid(1)]),
                    svp: None,
                    cert: None,
                },
                &signer,
            )
            .unwrap()
            .validate()
            .unwrap()
        };

        let m1 = mk(1);
        let mut m2 = mk(1);
        m2.inner.values = Set::new(vec![pid(2)]);

        cp.record_and_check_equivocation(&m1).await;
        cp.record_and_check_equivocation(&m2).await;
        cp.record_and_check_equivocation(&m2).await;

        let proof = mal_rx.try_recv().expect("expected exactly one proof");
        assert_eq!(proof.kind, MalfeasanceKind::HareEquivocation);
        assert!(mal_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn limit_iterations_zero_times_out_without_committing() {
        let (cp, _in_tx, mut out_rx, _mal_rx) = make_cp(1, 0);
        let cancel = CancellationToken::new();
        let initial = Set::new(vec![pid(1)]);

        let handle = tokio::spawn(cp.clone().run(initial.clone(), cancel.clone()));
        cp.round_clock.advance();

        let outcome = tokio::time::timeout(Duration::from_secs(1), out_rx.recv())
            .await
            .expect("timed out waiting for outcome")
            .expect("channel closed");

        assert!(!outcome.completed);
        assert_eq!(outcome.set, initial);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn filter_by_support_keeps_only_values_above_threshold() {
        let (cp, _in_tx, _out_rx, _mal_rx) = make_cp(4, 0);
        let remote1 = EdSigner::generate();
        let remote2 = EdSigner::generate();

        let msg_from = |signer: &EdSigner, id: ProposalId| {
            Message::sign_and_finalize(
                MessageInner {
                    instance_id: Layer::new(1),
                    round: 0,
                    role_proof: common::VrfSignature(vec![]),
                    values: Set::new(vec![id]),
                    svp: None,
                    cert: None,
                },
                signer,
            )
            .unwrap()
            .validate()
            .unwrap()
        };

        let msgs = vec![msg_from(&remote1, pid(2)), msg_from(&remote2, pid(2))];
        let current = Set::new(vec![pid(1)]);
        let filtered = cp.filter_by_support(&current, &msgs);

        // committee_size=4 -> f=1, threshold=2. pid(1) has 1 supporter (self), dropped.
        // pid(2) has 2 supporters (remote1, remote2), kept.
        assert_eq!(filtered, Set::new(vec![pid(2)]));
    }
}
