//! Narrow collaborator traits shared by the activation and hare pipelines.
//! Each one covers a single concern, composed by the owning builder or
//! orchestrator rather than bundled into one fat "node services" trait.

use async_trait::async_trait;

use crate::{AtxId, Epoch, Layer, NodeId};

/// Reports whether the node has caught up enough with the network to
/// participate in a given layer, and gates the ATX builder's first move
/// per epoch on having caught up on ATX-relevant gossip.
#[async_trait]
pub trait Syncer: Send + Sync {
    /// Resolves once the node is synced enough to safely build a new
    /// ATX challenge. Re-resolves immediately if already synced.
    async fn wait_atx_synced(&self);

    /// Whether the node considers itself synced as of `layer`.
    fn synced(&self, layer: Layer) -> bool;
}

/// Minimal metadata about a previously published ATX, enough to compute
/// positioning ATX selection and the hare "good proposals" anti-future
/// filter without depending on the full SQLite-backed store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AtxHeader {
    pub id: AtxId,
    pub node_id: NodeId,
    pub publish_epoch: Epoch,
    pub sequence: u64,
    pub tick_height: u64,
}

/// Read access to locally known ATX headers. The real store is SQLite-backed
/// and out of scope here; this is the narrow slice the builder and the
/// hare good-proposals filter need.
#[async_trait]
pub trait AtxProvider: Send + Sync {
    /// The identity's own most recent ATX, if any.
    async fn last_atx(&self, node: NodeId) -> Option<AtxHeader>;

    /// The ATX with the highest tick height across all identities, used
    /// as the positioning ATX when the node has no history of its own.
    async fn golden_atx(&self) -> AtxId;

    async fn header(&self, id: AtxId) -> Option<AtxHeader>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeSyncer {
        synced: AtomicBool,
    }

    impl FakeSyncer {
        pub fn new(synced: bool) -> Self {
            Self {
                synced: AtomicBool::new(synced),
            }
        }

        pub fn set_synced(&self, synced: bool) {
            self.synced.store(synced, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Syncer for FakeSyncer {
        async fn wait_atx_synced(&self) {
            while !self.synced.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
        }

        fn synced(&self, _layer: Layer) -> bool {
            self.synced.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    pub struct FakeAtxProvider {
        headers: Mutex<HashMap<AtxId, AtxHeader>>,
        last_by_node: Mutex<HashMap<NodeId, AtxId>>,
        golden: AtxId,
    }

    impl FakeAtxProvider {
        pub fn new(golden: AtxId) -> Self {
            Self {
                golden,
                ..Default::default()
            }
        }

        pub fn insert(&self, header: AtxHeader) {
            self.last_by_node.lock().unwrap().insert(header.node_id, header.id);
            self.headers.lock().unwrap().insert(header.id, header);
        }
    }

    #[async_trait]
    impl AtxProvider for FakeAtxProvider {
        async fn last_atx(&self, node: NodeId) -> Option<AtxHeader> {
            let id = *self.last_by_node.lock().unwrap().get(&node)?;
            self.headers.lock().unwrap().get(&id).copied()
        }

        async fn golden_atx(&self) -> AtxId {
            self.golden
        }

        async fn header(&self, id: AtxId) -> Option<AtxHeader> {
            self.headers.lock().unwrap().get(&id).copied()
        }
    }
}
