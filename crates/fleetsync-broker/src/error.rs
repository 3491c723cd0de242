use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("{field} must not be empty")]
    EmptyIdentifier { field: &'static str },
    #[error("unknown destination matching mode: {0} (expected exact or pattern)")]
    UnknownMatching(String),
}
