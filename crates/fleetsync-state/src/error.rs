use fleetsync_broker::BrokerError;
use fleetsync_core::Domain;
use thiserror::Error;

use crate::bus::FleetEventKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("{domain} data unavailable for {scope}: {reason}")]
    DataUnavailable {
        domain: Domain,
        scope: String,
        reason: String,
    },
    #[error("inconsistent {domain} update for cluster {cluster_id}: {reason}")]
    InconsistentUpdate {
        domain: Domain,
        cluster_id: String,
        reason: String,
    },
    #[error("{domain} hash computation failed: {reason}")]
    HashComputation { domain: Domain, reason: String },
    #[error("{domain} is host-scoped; the event needs a host_name")]
    MissingHost { domain: Domain },
    #[error("{domain} payload encode failed: {reason}")]
    Encode { domain: Domain, reason: String },
    #[error("invalid {domain} event: {reason}")]
    InvalidEvent { domain: Domain, reason: String },
    #[error("session {0} has not registered a host")]
    UnregisteredSession(String),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error("{} handler(s) failed for {kind} event", .errors.len())]
    HandlersFailed {
        kind: FleetEventKind,
        errors: Vec<StateError>,
    },
}
