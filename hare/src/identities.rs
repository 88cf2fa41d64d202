//! Narrow read/write slice of the identities store the orchestrator
//! needs to persist and query malfeasance proofs. The real store is
//! SQLite-backed and out of scope here.

use async_trait::async_trait;
use common::{Layer, NodeId};

use crate::types::MalfeasanceKind;
use crate::Error;

#[async_trait]
pub trait IdentitiesStore: Send + Sync {
    async fn save_malfeasance(&self, node: NodeId, kind: MalfeasanceKind, bytes: Vec<u8>) -> Result<(), Error>;
    async fn is_malicious(&self, node: NodeId) -> bool;
    async fn malfeasance_blob(&self, node: NodeId) -> Option<Vec<u8>>;

    /// Pre-warms whatever per-layer active-identity cache the real store
    /// keeps, ahead of the tick's own lookups. A no-op by default; stores
    /// backed by a cache worth warming override it.
    async fn warm_active_cache(&self, _layer: Layer) {}
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeIdentitiesStore {
        malfeasance: Mutex<HashMap<NodeId, (MalfeasanceKind, Vec<u8>)>>,
        pub save_calls: Mutex<u32>,
    }

    impl FakeIdentitiesStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn mark_malicious(&self, node: NodeId) {
            self.malfeasance
                .lock()
                .unwrap()
                .entry(node)
                .or_insert((MalfeasanceKind::HareEquivocation, Vec::new()));
        }
    }

    #[async_trait]
    impl IdentitiesStore for FakeIdentitiesStore {
        async fn save_malfeasance(&self, node: NodeId, kind: MalfeasanceKind, bytes: Vec<u8>) -> Result<(), Error> {
            *self.save_calls.lock().unwrap() += 1;
            self.malfeasance.lock().unwrap().insert(node, (kind, bytes));
            Ok(())
        }

        async fn is_malicious(&self, node: NodeId) -> bool {
            self.malfeasance.lock().unwrap().contains_key(&node)
        }

        async fn malfeasance_blob(&self, node: NodeId) -> Option<Vec<u8>> {
            self.malfeasance.lock().unwrap().get(&node).map(|(_, b)| b.clone())
        }
    }
}
