//! Binary entry point: wires the layer clock, the ATX builder and the
//! Hare orchestrator into a single runnable process. CLI flags locate a
//! layered TOML config; everything else (the gossip transport, the
//! SQLite-backed stores, the real PoST prover and PoET client) is out of
//! scope for this repository and stands in as the narrowest honest
//! placeholder documented in [`collaborators`].

mod cli;
mod collaborators;
mod config;
mod error;
mod logging;

use std::sync::Arc;

use clap::Parser;
use clock::{LayerClock, SystemLayerClock};
use common::{AtxId, Beacon};
use hare::{Broker, FixedRoundClock, HareOrchestrator, OrchestratorConfig};
use post::PostSetupOpts;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::Cli;
use crate::collaborators::Collaborators;
use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let mut cfg = Config::load(&cli.config).unwrap_or_else(|e| {
        tracing::warn!(error = %e, path = ?cli.config, "could not load config file, using defaults");
        Config::default()
    });
    if let Some(data_dir) = cli.data_dir {
        cfg.node.data_dir = data_dir;
    }
    std::fs::create_dir_all(&cfg.node.data_dir)?;

    let clock: Arc<dyn LayerClock> = Arc::new(SystemLayerClock::new(
        cfg.clock.genesis_time(),
        cfg.clock.layer_duration,
        cfg.clock.layers_per_epoch,
    ));
    info!(
        current_layer = clock.current_layer().0,
        current_epoch = clock.current_epoch().0,
        "layer clock initialized"
    );

    let signer = common::signing::EdSigner::generate();
    info!(node_id = %signer.node_id(), "generated ephemeral smesher identity");

    let collab = Collaborators::new(Beacon([0; 4]), AtxId::zero());

    let builder_store = Arc::new(activation::BuilderStore::new(cfg.node.data_dir.join("activation")));
    std::fs::create_dir_all(cfg.node.data_dir.join("activation"))?;

    let builder = activation::ActivationBuilder::new(
        common::Address::zero(),
        collab.prover.clone(),
        collab.atx_provider.clone(),
        collab.syncer.clone(),
        collab.atx_handler.clone(),
        clock.clone(),
        collab.gossip.clone(),
        builder_store,
        signer.clone(),
        cfg.poet.clone(),
        cfg.clock.layers_per_epoch,
    );

    let post_opts = PostSetupOpts {
        data_dir: cfg.node.data_dir.join("post").to_string_lossy().into_owned(),
        num_units: cfg.node.post_num_units,
        max_file_size: cfg.node.post_max_file_size,
        provider_id: None,
        throttle: false,
    };
    builder.start(post_opts).await?;

    let broker = Broker::new(
        collab.oracle.clone(),
        collab.syncer.clone(),
        signer.node_id(),
        cfg.hare,
    );
    let round_clock = Arc::new(FixedRoundClock::new(clock.clone(), cfg.hare.round_duration));
    let (block_gen_tx, mut block_gen_rx) = mpsc::channel(cfg.hare.hdist.max(1) as usize);

    let orchestrator_cfg = OrchestratorConfig {
        effective_genesis: common::Layer::new(cfg.clock.effective_genesis),
        layers_per_epoch: cfg.clock.layers_per_epoch,
        hare: cfg.hare,
    };
    let orchestrator = HareOrchestrator::new(
        orchestrator_cfg,
        signer,
        broker,
        collab.oracle.clone(),
        collab.gossip.clone(),
        round_clock,
        collab.syncer.clone(),
        collab.proposals.clone(),
        collab.identities.clone(),
        collab.beacons.clone(),
        collab.atx_provider.clone(),
        block_gen_tx,
    );

    let block_gen_consumer = tokio::spawn(async move {
        while let Some((layer, set)) = block_gen_rx.recv().await {
            info!(layer = layer.0, proposals = set.ids().len(), "hare output ready for block generation");
        }
    });

    let cancel = CancellationToken::new();
    let orchestrator_handle = tokio::spawn(orchestrator.run(clock, cancel.clone()));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping");

    cancel.cancel();
    let _ = orchestrator_handle.await;
    builder.stop(false).await?;
    block_gen_consumer.abort();

    Ok(())
}
