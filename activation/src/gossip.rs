//! Publish-only collaborator for the `atx` gossip topic.

use async_trait::async_trait;

use crate::Error;

#[async_trait]
pub trait AtxGossip: Send + Sync {
    async fn publish(&self, encoded_atx: Vec<u8>) -> Result<(), Error>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeAtxGossip {
        pub published: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl AtxGossip for FakeAtxGossip {
        async fn publish(&self, encoded_atx: Vec<u8>) -> Result<(), Error> {
            self.published.lock().unwrap().push(encoded_atx);
            Ok(())
        }
    }
}
