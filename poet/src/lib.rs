//! PoET client pool: submits challenges to remote proof-of-elapsed-time
//! services and retrieves their membership proofs. The RPC transport
//! itself is out of scope; this crate shapes the narrow contract the
//! NIPoST builder consumes and the responsiveness-probing behavior
//! `update_poet_servers` needs before swapping in a new client set.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Opaque identifier a PoET service returns for itself, used to detect
/// when the same round's proof is retrievable from more than one service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoetServiceId(pub String);

#[derive(Clone, Debug)]
pub struct PoetProof {
    pub membership: Vec<u8>,
    pub round: String,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("poet endpoint {endpoint} unresponsive: {reason}")]
    Unresponsive { endpoint: String, reason: String },
    #[error("poet rpc failed: {0}")]
    Rpc(String),
}

/// Narrow collaborator trait. One concrete instance per configured
/// endpoint.
#[async_trait]
pub trait PoetClient: Send + Sync {
    fn endpoint(&self) -> &str;
    async fn poet_service_id(&self) -> Result<PoetServiceId, Error>;
    async fn submit(&self, challenge: &[u8]) -> Result<String, Error>;
    async fn get_proof(&self, round: &str) -> Result<PoetProof, Error>;
}

/// Per-endpoint responsiveness deadline applied by `update_poet_servers`.
pub const PROBE_DEADLINE: Duration = Duration::from_secs(10);

/// Probes every client in `candidates` for responsiveness within
/// [`PROBE_DEADLINE`]. All candidates must answer or the whole batch is
/// rejected — a partially-responsive set is not installed, matching the
/// "pending slot untouched on any failure" contract of `update_poet_servers`.
pub async fn probe_all<C: PoetClient + ?Sized>(
    candidates: &[std::sync::Arc<C>],
) -> Result<(), Error> {
    for client in candidates {
        match tokio::time::timeout(PROBE_DEADLINE, client.poet_service_id()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(Error::Unresponsive {
                    endpoint: client.endpoint().to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(Error::Unresponsive {
                    endpoint: client.endpoint().to_string(),
                    reason: "probe timed out".into(),
                })
            }
        }
    }
    Ok(())
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    pub struct FakePoetClient {
        endpoint: String,
        pub responsive: AtomicBool,
    }

    impl FakePoetClient {
        pub fn new(endpoint: &str) -> Self {
            Self {
                endpoint: endpoint.to_string(),
                responsive: AtomicBool::new(true),
            }
        }

        pub fn set_responsive(&self, responsive: bool) {
            self.responsive.store(responsive, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl PoetClient for FakePoetClient {
        fn endpoint(&self) -> &str {
            &self.endpoint
        }

        async fn poet_service_id(&self) -> Result<PoetServiceId, Error> {
            if self.responsive.load(Ordering::SeqCst) {
                Ok(PoetServiceId(self.endpoint.clone()))
            } else {
                Err(Error::Rpc("offline".into()))
            }
        }

        async fn submit(&self, _challenge: &[u8]) -> Result<String, Error> {
            Ok("round-1".to_string())
        }

        async fn get_proof(&self, round: &str) -> Result<PoetProof, Error> {
            Ok(PoetProof {
                membership: vec![1, 2, 3],
                round: round.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakePoetClient;
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn probe_all_succeeds_when_all_responsive() {
        let clients = vec![
            Arc::new(FakePoetClient::new("http://a")),
            Arc::new(FakePoetClient::new("http://b")),
        ];
        probe_all(&clients).await.unwrap();
    }

    #[tokio::test]
    async fn probe_all_fails_when_any_endpoint_unresponsive() {
        let a = Arc::new(FakePoetClient::new("http://a"));
        let b = Arc::new(FakePoetClient::new("http://b"));
        b.set_responsive(false);
        let err = probe_all(&[a, b]).await.unwrap_err();
        assert!(matches!(err, Error::Unresponsive { .. }));
    }
}
