use thiserror::Error;

/// Error taxonomy for the ATX mining pipeline. Every variant maps onto one
/// of the policies in the loop's error-handling table: some are recovered
/// with a specific retry delay, some are fatal.
#[derive(Debug, Error)]
pub enum Error {
    #[error("smeshing already started")]
    AlreadyStarted,
    #[error("smeshing not started")]
    NotStarted,
    #[error("the publication window for this challenge has already passed")]
    ChallengeExpired,
    #[error("poet service unstable: {0}")]
    PoetServiceUnstable(String),
    #[error("post data corrupted or invalid, operator intervention required: {0}")]
    Fatal(String),
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Persistence(#[from] common::atomic_file::Error),
    #[error(transparent)]
    Codec(#[from] common::codec::Error),
    #[error(transparent)]
    Post(#[from] post::Error),
    #[error(transparent)]
    Poet(#[from] poet::Error),
    #[error("{0}")]
    Other(String),
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}
