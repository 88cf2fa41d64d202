//! The hare orchestrator's per-tick candidate filter: narrows the set of
//! proposals gossiped for a layer down to the ones this node is willing
//! to initialize a consensus instance with. Grounded in the same
//! narrow-trait-per-concern style as [`crate::oracle::Oracle`] and
//! [`crate::identities::IdentitiesStore`] — the real proposal/ballot
//! store, active-set resolution and ATX grading are SQLite-backed and
//! out of scope here; this module only shapes the contract and the
//! filter logic that consumes it.

use std::collections::HashSet;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use common::{AtxId, BallotId, Beacon, Layer, NodeId, ProposalId};

/// Epoch data (beacon + active set) a proposal either carries directly or
/// inherits from the ref ballot it follows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EpochData {
    pub beacon: Beacon,
    pub active_set: Vec<AtxId>,
}

/// Minimal proposal metadata the filter needs, narrower than the full
/// ballot/proposal record the mesh keeps.
#[derive(Clone, Debug)]
pub struct ProposalHeader {
    pub id: ProposalId,
    pub smesher: NodeId,
    pub atx_id: AtxId,
    pub base_tick_height: u64,
    /// `Some` when this proposal's own ballot carries epoch data; `None`
    /// for a follower ballot, which instead points at a ref ballot.
    pub epoch_data: Option<EpochData>,
    pub ref_ballot: Option<BallotId>,
}

/// Read access the filter needs: the layer's proposals, malfeasance
/// status, ref-ballot epoch data, and ATX grading.
#[async_trait]
pub trait ProposalProvider: Send + Sync {
    async fn proposals(&self, layer: Layer) -> Vec<ProposalHeader>;
    async fn is_malicious(&self, node: NodeId) -> bool;
    async fn ref_ballot_epoch_data(&self, ballot: BallotId) -> Option<EpochData>;
    /// Grades an ATX's timing against the epoch start and the network's
    /// configured propagation delay; a grade of `0` means the ATX's
    /// timing can't be trusted for this epoch.
    async fn grade_atx(&self, id: AtxId, epoch_start: SystemTime, network_delay: Duration) -> u8;
}

/// Narrows a layer's gossiped proposals down to the ones worth seeding a
/// consensus instance with: drop malicious smeshers, dedup repeated ATX
/// ids (first occurrence wins), drop anti-future proposals, resolve each
/// proposal's beacon/active set, grade every ATX in the active set, and
/// drop beacon mismatches. Missing beacon or active-set data aborts the
/// whole filter (returns empty) rather than dropping just the one
/// proposal, since it signals the node's own view of the epoch is
/// incomplete.
pub async fn good_proposals<P: ProposalProvider>(
    provider: &P,
    layer: Layer,
    own_tick_height: u64,
    own_beacon: Beacon,
    epoch_start: SystemTime,
    network_delay: Duration,
) -> Vec<ProposalId> {
    let proposals = provider.proposals(layer).await;
    if proposals.is_empty() {
        return Vec::new();
    }

    let mut seen_atx = HashSet::new();
    let mut survivors = Vec::new();

    for p in &proposals {
        if provider.is_malicious(p.smesher).await {
            continue;
        }
        if !seen_atx.insert(p.atx_id) {
            continue;
        }
        if p.base_tick_height >= own_tick_height {
            continue;
        }

        let epoch_data = match &p.epoch_data {
            Some(data) => data.clone(),
            None => match p.ref_ballot {
                Some(ballot) => match provider.ref_ballot_epoch_data(ballot).await {
                    Some(data) => data,
                    None => return Vec::new(),
                },
                None => return Vec::new(),
            },
        };
        if epoch_data.active_set.is_empty() {
            return Vec::new();
        }

        let mut all_graded = true;
        for atx in &epoch_data.active_set {
            if provider.grade_atx(*atx, epoch_start, network_delay).await == 0 {
                all_graded = false;
                break;
            }
        }
        if !all_graded {
            continue;
        }

        if epoch_data.beacon != own_beacon {
            continue;
        }

        survivors.push(p.id);
    }

    survivors
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeProposalProvider {
        pub by_layer: Mutex<HashMap<Layer, Vec<ProposalHeader>>>,
        pub malicious: Mutex<HashSet<NodeId>>,
        pub ref_ballots: Mutex<HashMap<BallotId, EpochData>>,
        pub zero_graded: Mutex<HashSet<AtxId>>,
    }

    impl FakeProposalProvider {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_layer(&self, layer: Layer, proposals: Vec<ProposalHeader>) {
            self.by_layer.lock().unwrap().insert(layer, proposals);
        }

        pub fn mark_malicious(&self, node: NodeId) {
            self.malicious.lock().unwrap().insert(node);
        }

        pub fn mark_ungraded(&self, atx: AtxId) {
            self.zero_graded.lock().unwrap().insert(atx);
        }
    }

    #[async_trait]
    impl ProposalProvider for FakeProposalProvider {
        async fn proposals(&self, layer: Layer) -> Vec<ProposalHeader> {
            self.by_layer.lock().unwrap().get(&layer).cloned().unwrap_or_default()
        }

        async fn is_malicious(&self, node: NodeId) -> bool {
            self.malicious.lock().unwrap().contains(&node)
        }

        async fn ref_ballot_epoch_data(&self, ballot: BallotId) -> Option<EpochData> {
            self.ref_ballots.lock().unwrap().get(&ballot).cloned()
        }

        async fn grade_atx(&self, id: AtxId, _epoch_start: SystemTime, _network_delay: Duration) -> u8 {
            if self.zero_graded.lock().unwrap().contains(&id) {
                0
            } else {
                10
            }
        }
    }
}
