use thiserror::Error;

/// Error taxonomy for the broker and the consensus orchestrator. Most
/// variants are classification outcomes the gossip validator collapses
/// to `Accept`/`Ignore` and never propagates further.
#[derive(Debug, Error)]
pub enum Error {
    #[error("node not synced for this layer")]
    NotSynced,
    #[error("no active mailbox for this layer")]
    Unregistered,
    #[error("mailbox registration still in progress for this layer")]
    Registration,
    #[error("message is for a layer more than one ahead of the latest seen")]
    EarlyMsg,
    #[error("hare result requested after its buffer slot expired")]
    TooLate,
    #[error("queried layer never produced an output")]
    NoResult,
    #[error("fatal hare invariant violated: {0}")]
    Fatal(String),
    #[error(transparent)]
    Codec(#[from] common::codec::Error),
    #[error("{0}")]
    Other(String),
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}
