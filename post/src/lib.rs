//! Proof-of-space-time prover collaborator: opaque proofs over a challenge
//! on locally initialized data. The real proof generator lives outside this
//! crate's scope; [`Prover`] is the narrow interface the NIPoST builder
//! consumes, with [`FakeProver`] as the in-memory stand-in used in tests.

use async_trait::async_trait;
use common::AtxId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Immutable-after-start configuration for a proving session. Changing
/// `num_units` requires tearing down and re-initializing the data directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostSetupOpts {
    pub data_dir: String,
    pub num_units: u32,
    pub max_file_size: u64,
    pub provider_id: Option<u32>,
    pub throttle: bool,
}

/// Opaque proof blob plus the metadata needed to validate it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub proof: Vec<u8>,
    pub metadata: PostMetadata,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMetadata {
    pub challenge: Vec<u8>,
    pub labels_per_unit: u64,
}

/// Index of the VRF nonce found during initialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VrfNonceIndex(pub u64);

#[derive(Debug, Error)]
pub enum Error {
    #[error("post proof verification failed")]
    InvalidProof,
    #[error("post data corrupted, operator intervention required: {0}")]
    Corrupted(String),
    #[error("proving session not started")]
    NotStarted,
}

/// Narrow collaborator interface the NIPoST builder consumes. The real
/// prover initializes and proves over on-disk labels; this crate only
/// shapes the contract.
#[async_trait]
pub trait Prover: Send + Sync {
    async fn prepare(&self, opts: PostSetupOpts) -> Result<(), Error>;
    async fn start_session(&self) -> Result<(), Error>;
    async fn generate_proof(&self, challenge: &[u8]) -> Result<(Post, PostMetadata), Error>;
    fn vrf_nonce(&self) -> Option<VrfNonceIndex>;
    fn last_opts(&self) -> Option<PostSetupOpts>;
    fn commitment_atx(&self) -> Option<AtxId>;
    async fn reset(&self) -> Result<(), Error>;

    /// Verifies a previously generated proof. Used once, for the node's
    /// own initial post, before it is persisted: a corrupted or invalid
    /// initial proof is fatal and requires operator intervention.
    fn verify(&self, post: &Post) -> Result<(), Error>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use tokio::sync::Mutex;

    /// Deterministic in-memory prover used by tests: "proofs" are just a
    /// blake3 digest of the challenge, and `verify` recomputes it.
    pub struct FakeProver {
        opts: Mutex<Option<PostSetupOpts>>,
        started: Mutex<bool>,
        commitment_atx: Option<AtxId>,
        nonce: VrfNonceIndex,
        fail_next: Mutex<bool>,
    }

    impl FakeProver {
        pub fn new(commitment_atx: Option<AtxId>) -> Self {
            Self {
                opts: Mutex::new(None),
                started: Mutex::new(false),
                commitment_atx,
                nonce: VrfNonceIndex(7),
                fail_next: Mutex::new(false),
            }
        }

        pub async fn fail_next_proof(&self) {
            *self.fail_next.lock().await = true;
        }
    }

    #[async_trait]
    impl Prover for FakeProver {
        async fn prepare(&self, opts: PostSetupOpts) -> Result<(), Error> {
            *self.opts.lock().await = Some(opts);
            Ok(())
        }

        async fn start_session(&self) -> Result<(), Error> {
            if self.opts.lock().await.is_none() {
                return Err(Error::NotStarted);
            }
            *self.started.lock().await = true;
            Ok(())
        }

        async fn generate_proof(&self, challenge: &[u8]) -> Result<(Post, PostMetadata), Error> {
            if !*self.started.lock().await {
                return Err(Error::NotStarted);
            }
            if std::mem::take(&mut *self.fail_next.lock().await) {
                return Err(Error::Corrupted("simulated prover failure".into()));
            }
            let metadata = PostMetadata {
                challenge: challenge.to_vec(),
                labels_per_unit: 2048,
            };
            let proof = blake3::hash(challenge).as_bytes().to_vec();
            Ok((
                Post {
                    proof,
                    metadata: metadata.clone(),
                },
                metadata,
            ))
        }

        fn vrf_nonce(&self) -> Option<VrfNonceIndex> {
            Some(self.nonce)
        }

        fn last_opts(&self) -> Option<PostSetupOpts> {
            None
        }

        fn commitment_atx(&self) -> Option<AtxId> {
            self.commitment_atx
        }

        async fn reset(&self) -> Result<(), Error> {
            *self.opts.lock().await = None;
            *self.started.lock().await = false;
            Ok(())
        }

        fn verify(&self, post: &Post) -> Result<(), Error> {
            let expected = blake3::hash(&post.metadata.challenge).as_bytes().to_vec();
            if expected == post.proof {
                Ok(())
            } else {
                Err(Error::InvalidProof)
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn prove_then_verify() {
            let prover = FakeProver::new(None);
            prover
                .prepare(PostSetupOpts {
                    data_dir: "/tmp/post".into(),
                    num_units: 4,
                    max_file_size: 1 << 30,
                    provider_id: None,
                    throttle: false,
                })
                .await
                .unwrap();
            prover.start_session().await.unwrap();
            let (post, _) = prover.generate_proof(&[0u8; 32]).await.unwrap();
            prover.verify(&post).unwrap();
        }

        #[tokio::test]
        async fn generate_proof_requires_started_session() {
            let prover = FakeProver::new(None);
            let err = prover.generate_proof(&[0u8; 32]).await.unwrap_err();
            assert!(matches!(err, Error::NotStarted));
        }
    }
}
