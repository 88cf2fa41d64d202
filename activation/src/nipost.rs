//! Component E: composes a non-interactive proof-of-space-time from a
//! challenge, coordinating the PoST prover and the PoET client pool and
//! persisting intermediate progress so a restart mid-epoch resumes rather
//! than starting over.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use poet::PoetClient;
use post::Prover;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::persistence::BuilderStore;
use crate::types::{NipostChallenge, PoetMembership};
use crate::{Error, Nipost};

/// Resumable progress through the PoET submit/wait/retrieve dance,
/// persisted to `nipost_state.bin` between steps. Tagged with the
/// challenge's hash so a stale state from a discarded challenge is never
/// mistakenly reused.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum NipostBuildState {
    Started {
        challenge_hash: [u8; 32],
    },
    PoetSubmitted {
        challenge_hash: [u8; 32],
        round: String,
    },
    PoetProofReceived {
        challenge_hash: [u8; 32],
        membership: PoetMembership,
    },
}

impl NipostBuildState {
    fn challenge_hash(&self) -> [u8; 32] {
        match self {
            Self::Started { challenge_hash }
            | Self::PoetSubmitted { challenge_hash, .. }
            | Self::PoetProofReceived { challenge_hash, .. } => *challenge_hash,
        }
    }
}

pub struct NipostBuilder<P> {
    prover: Arc<P>,
    poet_clients: RwLock<Vec<Arc<dyn PoetClient>>>,
    store: Arc<BuilderStore>,
    data_dir: PathBuf,
}

impl<P: Prover> NipostBuilder<P> {
    pub fn new(
        prover: Arc<P>,
        poet_clients: Vec<Arc<dyn PoetClient>>,
        store: Arc<BuilderStore>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            prover,
            poet_clients: RwLock::new(poet_clients),
            store,
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Replaces the active PoET client set. Called by the ATX builder
    /// between loop iterations, never mid-build.
    pub async fn update_poet_provers(&self, clients: Vec<Arc<dyn PoetClient>>) {
        *self.poet_clients.write().await = clients;
    }

    /// Drives the submit -> wait -> retrieve -> prove sequence, resuming
    /// from whatever `nipost_state.bin` records for this exact challenge.
    /// `round_wait` is the caller-computed delay until the PoET round
    /// this challenge was submitted to has closed.
    pub async fn build_nipost(
        &self,
        challenge: &NipostChallenge,
        num_units: u32,
        round_wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<Nipost, Error> {
        let challenge_hash = challenge
            .challenge_hash()
            .map_err(|e| Error::Other(e.to_string()))?;

        let mut state = self
            .store
            .load_nipost_state()?
            .filter(|s| s.challenge_hash() == challenge_hash)
            .unwrap_or(NipostBuildState::Started { challenge_hash });

        loop {
            state = match state {
                NipostBuildState::Started { challenge_hash } => {
                    let round = self.submit_to_poet(&challenge_hash).await?;
                    let next = NipostBuildState::PoetSubmitted {
                        challenge_hash,
                        round,
                    };
                    self.store.save_nipost_state(&next)?;
                    next
                }
                NipostBuildState::PoetSubmitted {
                    challenge_hash,
                    round,
                } => {
                    tokio::select! {
                        _ = tokio::time::sleep(round_wait) => {}
                        _ = cancel.cancelled() => return Err(Error::Other("cancelled".into())),
                    }
                    let membership = self.retrieve_proof(&round).await?;
                    let next = NipostBuildState::PoetProofReceived {
                        challenge_hash,
                        membership,
                    };
                    self.store.save_nipost_state(&next)?;
                    next
                }
                NipostBuildState::PoetProofReceived {
                    membership,
                    ..
                } => {
                    let (post, _) = self.prover.generate_proof(&challenge_hash).await?;
                    self.store.discard_nipost_state()?;
                    return Ok(Nipost {
                        membership,
                        post,
                        num_units,
                    });
                }
            };
        }
    }

    async fn submit_to_poet(&self, challenge_hash: &[u8; 32]) -> Result<String, Error> {
        let clients = self.poet_clients.read().await.clone();
        if clients.is_empty() {
            return Err(Error::PoetServiceUnstable("no poet clients configured".into()));
        }
        for client in &clients {
            match client.submit(challenge_hash).await {
                Ok(round) => return Ok(round),
                Err(e) => warn!(endpoint = client.endpoint(), error = %e, "poet submit failed"),
            }
        }
        Err(Error::PoetServiceUnstable("all poet submissions failed".into()))
    }

    async fn retrieve_proof(&self, round: &str) -> Result<PoetMembership, Error> {
        let clients = self.poet_clients.read().await.clone();
        for client in &clients {
            match client.get_proof(round).await {
                Ok(proof) => return Ok(proof.into()),
                Err(e) => warn!(endpoint = client.endpoint(), error = %e, "poet proof retrieval failed"),
            }
        }
        Err(Error::PoetServiceUnstable("no poet service returned a proof".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{AtxId, Epoch};
    use poet::fake::FakePoetClient;
    use post::fake::FakeProver;
    use crate::types::ChallengeKind;

    fn challenge() -> NipostChallenge {
        NipostChallenge {
            publish_epoch: Epoch::new(2),
            positioning_atx: AtxId::zero(),
            kind: ChallengeKind::Subsequent {
                prev_atx_id: AtxId::zero(),
                sequence: 1,
            },
        }
    }

    async fn prepared_prover() -> Arc<FakeProver> {
        let prover = Arc::new(FakeProver::new(None));
        prover
            .prepare(post::PostSetupOpts {
                data_dir: "/tmp/post".into(),
                num_units: 4,
                max_file_size: 1 << 20,
                provider_id: None,
                throttle: false,
            })
            .await
            .unwrap();
        prover.start_session().await.unwrap();
        prover
    }

    #[tokio::test]
    async fn builds_nipost_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(BuilderStore::new(dir.path()));
        let prover = prepared_prover().await;
        let clients: Vec<Arc<dyn PoetClient>> = vec![Arc::new(FakePoetClient::new("http://poet"))];
        let builder = NipostBuilder::new(prover, clients, store.clone(), dir.path());

        let cancel = CancellationToken::new();
        let nipost = builder
            .build_nipost(&challenge(), 4, Duration::from_millis(1), &cancel)
            .await
            .unwrap();
        assert_eq!(nipost.num_units, 4);
        assert!(store.load_nipost_state().unwrap().is_none());
    }

    #[tokio::test]
    async fn resumes_from_persisted_state_after_poet_submission() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(BuilderStore::new(dir.path()));
        let c = challenge();
        let hash = c.challenge_hash().unwrap();
        store
            .save_nipost_state(&NipostBuildState::PoetSubmitted {
                challenge_hash: hash,
                round: "round-1".into(),
            })
            .unwrap();

        let prover = prepared_prover().await;
        let clients: Vec<Arc<dyn PoetClient>> = vec![Arc::new(FakePoetClient::new("http://poet"))];
        let builder = NipostBuilder::new(prover, clients, store, dir.path());

        let cancel = CancellationToken::new();
        let nipost = builder
            .build_nipost(&c, 4, Duration::from_millis(1), &cancel)
            .await
            .unwrap();
        assert_eq!(nipost.membership.round, "round-1");
    }

    #[tokio::test]
    async fn fails_when_no_poet_clients_configured() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(BuilderStore::new(dir.path()));
        let prover = prepared_prover().await;
        let builder = NipostBuilder::new(prover, Vec::new(), store, dir.path());

        let cancel = CancellationToken::new();
        let err = builder
            .build_nipost(&challenge(), 4, Duration::from_millis(1), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PoetServiceUnstable(_)));
    }
}
