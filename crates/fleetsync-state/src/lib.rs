//! Hash-diffed state snapshots per domain, the fleet event bus that feeds
//! them, and the agent-facing ingress.

pub mod bus;
pub mod error;
pub mod fleet;
pub mod ingress;
pub mod provider;
pub mod store;

pub use bus::{FleetEvent, FleetEventBus, FleetEventKind};
pub use error::StateError;
pub use fleet::{FleetProviders, FleetState};
pub use ingress::{AgentIngress, ReportSink};
pub use provider::{CurrentDataProvider, ProviderError};
pub use store::{ClusterScopedStore, DomainStore, HostScopedStore, UpdateSink};
