//! Collaborator the ATX builder awaits self-reception through: once the
//! builder broadcasts its own ATX, it waits on this handler for the same
//! ATX to come back through gossip validation before it discards the
//! challenge that produced it.

use async_trait::async_trait;
use common::AtxId;

#[async_trait]
pub trait AtxHandler: Send + Sync {
    /// Resolves once `id` has been seen and validated (including via the
    /// node's own gossip loopback). Never resolves if it never arrives.
    async fn await_atx(&self, id: AtxId);

    fn unsubscribe_atx(&self, id: AtxId);
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Hand-written fake: polls `seen` at a short fixed interval. Good
    /// enough for tests where there's at most a handful of ids in flight.
    #[derive(Default)]
    pub struct FakeAtxHandler {
        seen: Mutex<HashSet<AtxId>>,
    }

    impl FakeAtxHandler {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn announce(&self, id: AtxId) {
            self.seen.lock().unwrap().insert(id);
        }
    }

    #[async_trait]
    impl AtxHandler for FakeAtxHandler {
        async fn await_atx(&self, id: AtxId) {
            loop {
                if self.seen.lock().unwrap().contains(&id) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }

        fn unsubscribe_atx(&self, id: AtxId) {
            self.seen.lock().unwrap().remove(&id);
        }
    }
}
