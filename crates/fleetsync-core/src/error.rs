use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("hash computation failed: {0}")]
    HashComputation(String),
    #[error("unknown state domain: {0}")]
    UnknownDomain(String),
}
