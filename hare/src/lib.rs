pub mod broker;
pub mod config;
pub mod consensus;
mod error;
pub mod good_proposals;
pub mod identities;
pub mod metrics;
pub mod oracle;
pub mod orchestrator;
pub mod round_clock;
pub mod types;

pub use broker::{Broker, Verdict};
pub use config::HareConfig;
pub use consensus::{ConsensusOutcome, ConsensusProcess};
pub use error::Error;
pub use good_proposals::{good_proposals, ProposalHeader, ProposalProvider};
pub use identities::IdentitiesStore;
pub use metrics::Metrics;
pub use oracle::Oracle;
pub use orchestrator::{HareOrchestrator, OrchestratorConfig};
pub use round_clock::{FixedRoundClock, RoundClock};
pub use types::{
    round_kind, AggregateProof, MalfeasanceKind, MalfeasanceProof, Message, MessageInner, Msg,
    Round, RoundKind, Set,
};
