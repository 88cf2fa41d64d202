//! Component F: the epoch-driven ATX builder state machine. Drives
//! `build -> publish` once per eligible epoch, persists enough state that
//! a restart never burns an epoch, and survives partial failures of the
//! prover, the PoET services, or the gossip publisher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clock::LayerClock;
use common::{Address, AtxId, Epoch, Syncer};
use poet::PoetClient;
use post::{Post, PostSetupOpts, Prover};
use rand::Rng;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::atx_handler::AtxHandler;
use crate::config::PoetConfig;
use crate::gossip::AtxGossip;
use crate::metrics::Metrics;
use crate::nipost::NipostBuilder;
use crate::persistence::BuilderStore;
use crate::types::{ActivationTx, ActivationTxInner, ChallengeKind, NipostChallenge, PostRef};
use crate::Error;

pub struct ActivationBuilder<P, A, Sy, H> {
    coinbase: RwLock<Address>,
    started: AtomicBool,
    lifecycle: Mutex<()>,
    task: Mutex<Option<JoinHandle<()>>>,
    cancel: Mutex<Option<CancellationToken>>,

    pending_poet_clients: watch::Sender<Option<Vec<Arc<dyn PoetClient>>>>,
    pending_poet_clients_rx: watch::Receiver<Option<Vec<Arc<dyn PoetClient>>>>,

    prover: Arc<P>,
    atx_provider: Arc<A>,
    syncer: Arc<Sy>,
    atx_handler: Arc<H>,
    clock: Arc<dyn LayerClock>,
    gossip: Arc<dyn AtxGossip>,
    nipost_builder: Arc<NipostBuilder<P>>,
    store: Arc<BuilderStore>,
    signer: common::signing::EdSigner,
    poet_cfg: PoetConfig,
    layers_per_epoch: u32,
    metrics: Arc<Metrics>,
}

impl<P, A, Sy, H> ActivationBuilder<P, A, Sy, H>
where
    P: Prover + 'static,
    A: common::AtxProvider + 'static,
    Sy: Syncer + 'static,
    H: AtxHandler + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        coinbase: Address,
        prover: Arc<P>,
        atx_provider: Arc<A>,
        syncer: Arc<Sy>,
        atx_handler: Arc<H>,
        clock: Arc<dyn LayerClock>,
        gossip: Arc<dyn AtxGossip>,
        store: Arc<BuilderStore>,
        signer: common::signing::EdSigner,
        poet_cfg: PoetConfig,
        layers_per_epoch: u32,
    ) -> Arc<Self> {
        let (tx, rx) = watch::channel(None);
        let data_dir = store.data_dir().to_path_buf();
        let nipost_builder = Arc::new(NipostBuilder::new(
            prover.clone(),
            Vec::new(),
            store.clone(),
            data_dir,
        ));
        Arc::new(Self {
            coinbase: RwLock::new(coinbase),
            started: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
            task: Mutex::new(None),
            cancel: Mutex::new(None),
            pending_poet_clients: tx,
            pending_poet_clients_rx: rx,
            prover,
            atx_provider,
            syncer,
            atx_handler,
            clock,
            gossip,
            nipost_builder,
            store,
            signer,
            poet_cfg,
            layers_per_epoch,
            metrics: Arc::new(Metrics::default()),
        })
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn smeshing(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub async fn coinbase(&self) -> Address {
        *self.coinbase.read().await
    }

    pub async fn set_coinbase(&self, coinbase: Address) {
        *self.coinbase.write().await = coinbase;
    }

    /// Begins post-data initialization and the main loop in a background
    /// task. Idempotent under concurrent callers: the CAS on `started`
    /// ensures only one caller transitions to running, and `lifecycle`
    /// serializes the CAS against `stop`'s teardown so the two never race.
    pub async fn start(self: &Arc<Self>, opts: PostSetupOpts) -> Result<(), Error> {
        let _guard = self.lifecycle.lock().await;
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyStarted);
        }

        self.prover.prepare(opts).await?;
        self.prover.start_session().await?;

        let cancel = CancellationToken::new();
        *self.cancel.lock().await = Some(cancel.clone());

        let this = self.clone();
        let handle = tokio::spawn(async move { this.run(cancel).await });
        *self.task.lock().await = Some(handle);
        Ok(())
    }

    /// Signals cancellation and waits for the background task to exit.
    /// Does not wait for the current PoET round to finish — it cancels
    /// and returns. `delete_files` additionally erases persisted state.
    pub async fn stop(&self, delete_files: bool) -> Result<(), Error> {
        let _guard = self.lifecycle.lock().await;
        if self
            .started
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::NotStarted);
        }

        if let Some(cancel) = self.cancel.lock().await.take() {
            cancel.cancel();
        }
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
        if delete_files {
            self.store.discard_challenge()?;
            self.store.discard_nipost_state()?;
        }
        Ok(())
    }

    /// Builds new PoET clients off the hot path, probes each for
    /// responsiveness within a bounded deadline, and only on full success
    /// hands them to the main loop via the single-slot pending cell. Any
    /// probe failure leaves the pending slot untouched.
    pub async fn update_poet_servers(&self, clients: Vec<Arc<dyn PoetClient>>) -> Result<(), Error> {
        poet::probe_all(&clients)
            .await
            .map_err(|e| Error::PoetServiceUnstable(e.to_string()))?;
        self.pending_poet_clients
            .send(Some(clients))
            .map_err(|_| Error::Other("builder loop gone".into()))?;
        Ok(())
    }

    #[instrument(skip(self, cancel), fields(node_id = %self.signer.node_id()))]
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut pending_rx = self.pending_poet_clients_rx.clone();
        loop {
            if cancel.is_cancelled() {
                info!("atx builder cancelled, exiting");
                return;
            }

            if pending_rx.has_changed().unwrap_or(false) {
                if let Some(clients) = pending_rx.borrow_and_update().clone() {
                    self.nipost_builder.update_poet_provers(clients).await;
                }
            }

            match self.publish_one_atx(&cancel).await {
                Ok(()) => {}
                Err(Error::ChallengeExpired) => {
                    self.metrics.record_challenge_expired();
                    let _ = self.store.discard_challenge();
                    if sleep_or_cancelled(self.layer_duration_estimate(), &cancel).await {
                        return;
                    }
                }
                Err(Error::PoetServiceUnstable(reason)) => {
                    self.metrics.record_poet_retry();
                    warn!(reason = %reason, "poet service unstable, backing off");
                    if sleep_or_cancelled(self.poet_cfg.poet_retry_interval, &cancel).await {
                        return;
                    }
                }
                Err(Error::Fatal(reason)) => {
                    warn!(reason = %reason, "fatal activation error, halting builder");
                    return;
                }
                Err(Error::Cancelled) => {
                    info!("atx builder cancelled, exiting");
                    return;
                }
                Err(other) => {
                    warn!(error = %other, "activation loop error, retrying next layer");
                    if sleep_or_cancelled(self.layer_duration_estimate(), &cancel).await {
                        return;
                    }
                }
            }
        }
    }

    fn layer_duration_estimate(&self) -> Duration {
        let now = self.clock.current_layer();
        let next = self.clock.layer_to_time(now.add(1));
        next.duration_since(std::time::SystemTime::now())
            .unwrap_or(Duration::from_secs(1))
    }

    async fn publish_one_atx(&self, cancel: &CancellationToken) -> Result<(), Error> {
        let challenge = self.load_or_build_challenge(cancel).await?;

        if challenge.publish_epoch < self.clock.current_epoch() {
            return Err(Error::ChallengeExpired);
        }

        let round_wait = self.round_wait_for(challenge.publish_epoch);
        let nipost = self
            .nipost_builder
            .build_nipost(&challenge, self.num_units(), round_wait, cancel)
            .await?;

        self.clock
            .await_layer(challenge.publish_epoch.first_layer(self.layers_per_epoch))
            .await;

        if challenge.publish_epoch < self.clock.current_epoch() {
            return Err(Error::ChallengeExpired);
        }

        let is_initial = challenge.is_initial();
        let inner = ActivationTxInner {
            challenge: challenge.clone(),
            coinbase: *self.coinbase.read().await,
            nipost,
            num_units: self.num_units(),
            vrf_nonce: is_initial.then(|| self.prover.vrf_nonce()).flatten(),
            node_id: is_initial.then(|| self.signer.node_id()),
        };
        let atx = ActivationTx::sign_and_finalize(inner, &self.signer)
            .map_err(|e| Error::Other(e.to_string()))?;

        let encoded = common::codec::encode(&atx).map_err(Error::from)?;
        self.gossip.publish(encoded).await?;

        let target_layer = challenge.publish_epoch.next().first_layer(self.layers_per_epoch);
        tokio::select! {
            _ = self.atx_handler.await_atx(atx.id) => {
                self.store.discard_challenge()?;
                self.metrics.record_published();
                Ok(())
            }
            _ = self.clock.await_layer(target_layer) => {
                Err(Error::ChallengeExpired)
            }
        }
    }

    fn num_units(&self) -> u32 {
        self.prover
            .last_opts()
            .map(|o| o.num_units)
            .unwrap_or(1)
    }

    fn round_wait_for(&self, publish_epoch: Epoch) -> Duration {
        let round_start = self.poet_round_start(publish_epoch);
        round_start
            .duration_since(std::time::SystemTime::now())
            .unwrap_or(Duration::ZERO)
    }

    fn poet_round_start(&self, epoch: Epoch) -> std::time::SystemTime {
        self.clock.layer_to_time(epoch.first_layer(self.layers_per_epoch)) + self.poet_cfg.phase_shift
    }

    /// Component E's entry point from the builder's point of view: wait
    /// for sync, pick the target epoch, compute the grace-window wait,
    /// select the positioning ATX and populate the challenge's XOR'd
    /// kind, then persist before returning.
    #[instrument(skip(self, cancel))]
    async fn build_nipost_challenge(&self, cancel: &CancellationToken) -> Result<NipostChallenge, Error> {
        self.syncer.wait_atx_synced().await;

        let node_id = self.signer.node_id();
        let last = self.atx_provider.last_atx(node_id).await;
        let current = self.clock.current_epoch();

        let target_epoch = match &last {
            Some(prev) if prev.publish_epoch == current.next() => current.next().next(),
            _ => current.next(),
        };

        let round_start = self.poet_round_start(target_epoch);
        let until = round_start
            .duration_since(std::time::SystemTime::now())
            .unwrap_or(Duration::ZERO);
        if until.is_zero() {
            return Err(Error::ChallengeExpired);
        }

        let wait = time_to_wait_to_build_challenge(
            until,
            self.poet_cfg.grace_period,
            self.poet_cfg.max_jitter_percent,
        );
        if sleep_or_cancelled(wait, cancel).await {
            return Err(Error::Cancelled);
        }

        // Spec: positioning ATX is "local ATX with maximum tick height for
        // this identity". `AtxProvider` only exposes the identity's most
        // recently published ATX, not a ranked history — sequence numbers
        // are monotonic per identity and tick height is non-decreasing
        // with sequence, so the most recent ATX is always the max-height
        // one for this identity; there is nothing older to prefer it over.
        let positioning_atx = match &last {
            Some(prev) => prev.id,
            None => self.atx_provider.golden_atx().await,
        };

        let kind = match &last {
            Some(prev) => ChallengeKind::Subsequent {
                prev_atx_id: prev.id,
                sequence: prev.sequence + 1,
            },
            None => {
                let post = self.initial_post().await?;
                ChallengeKind::Initial {
                    commitment_atx: self
                        .prover
                        .commitment_atx()
                        .unwrap_or_else(|| positioning_atx),
                    initial_post: PostRef {
                        metadata: post.metadata,
                    },
                }
            }
        };

        let challenge = NipostChallenge {
            publish_epoch: target_epoch,
            positioning_atx,
            kind,
        };
        self.store.save_challenge(&challenge)?;
        Ok(challenge)
    }

    /// Runs the prover against the all-zero challenge once, verifies the
    /// result, and persists it. A corrupted or invalid proof here is
    /// fatal: operator intervention is required, this is never retried
    /// automatically.
    async fn initial_post(&self) -> Result<Post, Error> {
        if let Some(post) = self.store.load_initial_post()? {
            return Ok(post);
        }
        let (post, _) = self.prover.generate_proof(&[0u8; 32]).await?;
        self.prover
            .verify(&post)
            .map_err(|e| Error::Fatal(e.to_string()))?;
        self.store.save_initial_post(&post)?;
        Ok(post)
    }

    async fn load_or_build_challenge(&self, cancel: &CancellationToken) -> Result<NipostChallenge, Error> {
        if let Some(challenge) = self.store.load_challenge()? {
            if challenge.publish_epoch >= self.clock.current_epoch() {
                return Ok(challenge);
            }
        }
        self.build_nipost_challenge(cancel).await
    }
}

/// `until + jitter - grace`, where `jitter` is uniform in
/// `[0, grace * max_jitter_percent / 100]`. Spreads submissions across
/// the grace window instead of everyone hitting the PoET service at
/// exactly `round_start - grace`.
fn time_to_wait_to_build_challenge(until: Duration, grace: Duration, max_jitter_percent: u32) -> Duration {
    let max_jitter_nanos = grace.as_nanos().saturating_mul(max_jitter_percent as u128) / 100;
    let jitter = if max_jitter_nanos == 0 {
        Duration::ZERO
    } else {
        Duration::from_nanos(rand::thread_rng().gen_range(0..=max_jitter_nanos) as u64)
    };
    (until + jitter).checked_sub(grace).unwrap_or(Duration::ZERO)
}

/// Sleeps for `dur`, observing cancellation. Returns `true` if
/// cancelled before the sleep elapsed.
async fn sleep_or_cancelled(dur: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(dur) => false,
        _ = cancel.cancelled() => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atx_handler::fake::FakeAtxHandler;
    use crate::gossip::fake::FakeAtxGossip;
    use common::collab::fake::{FakeAtxProvider, FakeSyncer};
    use post::fake::FakeProver;
    use std::time::{Duration as StdDuration, SystemTime};

    #[test]
    fn jitter_spreads_within_grace_window() {
        let grace = StdDuration::from_secs(100);
        for _ in 0..20 {
            let wait = time_to_wait_to_build_challenge(StdDuration::from_secs(200), grace, 50);
            assert!(wait <= StdDuration::from_secs(150));
        }
    }

    fn make_builder(
        clock: Arc<dyn LayerClock>,
        golden: AtxId,
    ) -> (
        Arc<ActivationBuilder<FakeProver, FakeAtxProvider, FakeSyncer, FakeAtxHandler>>,
        Arc<FakeAtxGossip>,
        tempfile::TempDir,
    ) {
        let prover = Arc::new(FakeProver::new(None));
        let atx_provider = Arc::new(FakeAtxProvider::new(golden));
        let syncer = Arc::new(FakeSyncer::new(true));
        let atx_handler = Arc::new(FakeAtxHandler::new());
        let gossip = Arc::new(FakeAtxGossip::default());
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(BuilderStore::new(dir.path()));
        let signer = common::signing::EdSigner::generate();

        let builder = ActivationBuilder::new(
            Address::zero(),
            prover,
            atx_provider,
            syncer,
            atx_handler,
            clock,
            gossip.clone(),
            store,
            signer,
            PoetConfig {
                grace_period: StdDuration::from_millis(1),
                poet_retry_interval: StdDuration::from_millis(5),
                ..PoetConfig::default()
            },
            4,
        );
        (builder, gossip, dir)
    }

    #[tokio::test]
    async fn stop_without_start_is_not_started() {
        let clock: Arc<dyn LayerClock> = Arc::new(clock::SystemLayerClock::new(
            SystemTime::now(),
            StdDuration::from_millis(10),
            4,
        ));
        let (builder, _gossip, _dir) = make_builder(clock, AtxId::zero());
        let err = builder.stop(false).await.unwrap_err();
        assert!(matches!(err, Error::NotStarted));
    }

    #[tokio::test]
    async fn start_twice_is_already_started() {
        let clock: Arc<dyn LayerClock> = Arc::new(clock::SystemLayerClock::new(
            SystemTime::now() - StdDuration::from_secs(3600),
            StdDuration::from_millis(10),
            4,
        ));
        let (builder, _gossip, _dir) = make_builder(clock, AtxId::zero());
        builder
            .start(PostSetupOpts {
                data_dir: "/tmp/post".into(),
                num_units: 4,
                max_file_size: 1 << 20,
                provider_id: None,
                throttle: false,
            })
            .await
            .unwrap();
        let err = builder
            .start(PostSetupOpts {
                data_dir: "/tmp/post".into(),
                num_units: 4,
                max_file_size: 1 << 20,
                provider_id: None,
                throttle: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyStarted));
        builder.stop(false).await.unwrap();
    }

    #[tokio::test]
    async fn stop_is_idempotent_after_one_successful_call() {
        let clock: Arc<dyn LayerClock> = Arc::new(clock::SystemLayerClock::new(
            SystemTime::now() - StdDuration::from_secs(3600),
            StdDuration::from_millis(10),
            4,
        ));
        let (builder, _gossip, _dir) = make_builder(clock, AtxId::zero());
        builder
            .start(PostSetupOpts {
                data_dir: "/tmp/post".into(),
                num_units: 4,
                max_file_size: 1 << 20,
                provider_id: None,
                throttle: false,
            })
            .await
            .unwrap();
        builder.stop(false).await.unwrap();
        let err = builder.stop(false).await.unwrap_err();
        assert!(matches!(err, Error::NotStarted));
    }
}
