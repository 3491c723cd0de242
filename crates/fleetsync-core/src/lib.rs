//! Shared contracts for fleet state synchronization: content hashing, update
//! events, the per-domain cluster payloads and the agent wire envelope.

pub mod agent_configs;
pub mod alerts;
pub mod domain;
pub mod error;
pub mod event;
pub mod hash;
pub mod host_params;
pub mod metadata;
pub mod topology;
pub mod wire;

pub use domain::{ClusterData, Domain, Scope};
pub use error::SyncError;
pub use event::{ClusterMap, EventKind, SyncOutcome, UpdateEvent};
pub use hash::{canonical_json, Hashed, StateHasher};
