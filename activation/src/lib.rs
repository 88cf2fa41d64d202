//! Epoch-driven ATX mining pipeline.
//!
//! [`builder::ActivationBuilder`] is the public entry point: it owns the
//! PoST prover, the PoET client pool (via [`nipost::NipostBuilder`]), the
//! gossip publisher and the self-reception handler, and drives one
//! build-and-publish cycle per eligible epoch.

pub mod atx_handler;
pub mod builder;
pub mod config;
mod error;
pub mod gossip;
pub mod metrics;
pub mod nipost;
pub mod persistence;
pub mod types;

pub use atx_handler::AtxHandler;
pub use builder::ActivationBuilder;
pub use config::PoetConfig;
pub use error::Error;
pub use gossip::AtxGossip;
pub use metrics::Metrics;
pub use nipost::{NipostBuildState, NipostBuilder};
pub use persistence::BuilderStore;
pub use types::{
    ActivationTx, ActivationTxInner, ChallengeKind, Nipost, NipostChallenge, PoetMembership,
    PostRef,
};
