use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use fleetsync_core::agent_configs::ClusterConfigs;
use fleetsync_core::alerts::AlertCluster;
use fleetsync_core::host_params::HostLevelParamsCluster;
use fleetsync_core::metadata::MetadataCluster;
use fleetsync_core::topology::TopologyCluster;
use fleetsync_core::{Domain, UpdateEvent};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::StateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FleetEventKind {
    Topology,
    Metadata,
    AlertDefinitions,
    HostLevelParams,
    AgentConfigs,
    HostRemoved,
}

impl FleetEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FleetEventKind::Topology => "topology",
            FleetEventKind::Metadata => "metadata",
            FleetEventKind::AlertDefinitions => "alert_definitions",
            FleetEventKind::HostLevelParams => "host_level_params",
            FleetEventKind::AgentConfigs => "agent_configs",
            FleetEventKind::HostRemoved => "host_removed",
        }
    }
}

impl fmt::Display for FleetEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain notifications raised by the rest of the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum FleetEvent {
    Topology(UpdateEvent<TopologyCluster>),
    Metadata(UpdateEvent<MetadataCluster>),
    AlertDefinitions(UpdateEvent<AlertCluster>),
    HostLevelParams(UpdateEvent<HostLevelParamsCluster>),
    AgentConfigs(UpdateEvent<ClusterConfigs>),
    HostRemoved { host_name: String },
}

impl FleetEvent {
    pub fn kind(&self) -> FleetEventKind {
        match self {
            FleetEvent::Topology(_) => FleetEventKind::Topology,
            FleetEvent::Metadata(_) => FleetEventKind::Metadata,
            FleetEvent::AlertDefinitions(_) => FleetEventKind::AlertDefinitions,
            FleetEvent::HostLevelParams(_) => FleetEventKind::HostLevelParams,
            FleetEvent::AgentConfigs(_) => FleetEventKind::AgentConfigs,
            FleetEvent::HostRemoved { .. } => FleetEventKind::HostRemoved,
        }
    }

    /// Decodes a `{event_type, clusters, host_name?}` body for `domain`.
    pub fn from_domain_value(domain: Domain, body: Value) -> Result<Self, StateError> {
        fn decode<C: serde::de::DeserializeOwned>(
            domain: Domain,
            body: Value,
        ) -> Result<UpdateEvent<C>, StateError> {
            serde_json::from_value(body).map_err(|err| StateError::InvalidEvent {
                domain,
                reason: err.to_string(),
            })
        }

        Ok(match domain {
            Domain::Topology => FleetEvent::Topology(decode(domain, body)?),
            Domain::Metadata => FleetEvent::Metadata(decode(domain, body)?),
            Domain::AlertDefinitions => FleetEvent::AlertDefinitions(decode(domain, body)?),
            Domain::HostLevelParams => FleetEvent::HostLevelParams(decode(domain, body)?),
            Domain::AgentConfigs => FleetEvent::AgentConfigs(decode(domain, body)?),
        })
    }
}

type Handler = Arc<dyn Fn(&FleetEvent) -> Result<(), StateError> + Send + Sync>;

/// Synchronous in-process dispatch of [`FleetEvent`]s to registered handlers.
#[derive(Default)]
pub struct FleetEventBus {
    handlers: RwLock<HashMap<FleetEventKind, Vec<Handler>>>,
}

impl FleetEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, kind: FleetEventKind, handler: F)
    where
        F: Fn(&FleetEvent) -> Result<(), StateError> + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        handlers.entry(kind).or_default().push(Arc::new(handler));
    }

    /// Runs every handler for the event's kind, even after one fails.
    /// Returns the number of handlers that ran.
    pub fn publish(&self, event: &FleetEvent) -> Result<usize, StateError> {
        let kind = event.kind();
        let handlers: Vec<Handler> = {
            let registered = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
            registered.get(&kind).cloned().unwrap_or_default()
        };
        if handlers.is_empty() {
            debug!(event = "fleet_event_unhandled", kind = kind.as_str(), "no handlers registered");
            return Ok(0);
        }

        let mut errors = Vec::new();
        for handler in &handlers {
            if let Err(err) = handler(event) {
                warn!(
                    event = "fleet_event_handler_failed",
                    kind = kind.as_str(),
                    error = %err,
                    "fleet event handler failed"
                );
                errors.push(err);
            }
        }
        if errors.is_empty() {
            Ok(handlers.len())
        } else {
            Err(StateError::HandlersFailed { kind, errors })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dispatches_only_to_handlers_of_the_event_kind() {
        let bus = FleetEventBus::new();
        let removed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&removed);
        bus.register(FleetEventKind::HostRemoved, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        bus.register(FleetEventKind::Topology, |_| {
            panic!("topology handler must not run for host removal")
        });

        let event = FleetEvent::HostRemoved {
            host_name: "h1".to_string(),
        };
        assert_eq!(bus.publish(&event), Ok(1));
        assert_eq!(removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_errors_are_collected_after_all_handlers_ran() {
        let bus = FleetEventBus::new();
        let ran = Arc::new(AtomicUsize::new(0));
        bus.register(FleetEventKind::HostRemoved, |_| {
            Err(StateError::UnregisteredSession("s1".to_string()))
        });
        let counter = Arc::clone(&ran);
        bus.register(FleetEventKind::HostRemoved, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let result = bus.publish(&FleetEvent::HostRemoved {
            host_name: "h1".to_string(),
        });
        assert!(matches!(
            result,
            Err(StateError::HandlersFailed { kind: FleetEventKind::HostRemoved, ref errors }) if errors.len() == 1
        ));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn domain_bodies_decode_into_typed_events() {
        let body = json!({
            "event_type": "UPDATE",
            "host_name": "h1",
            "clusters": {"c1": {"configurations": {"core-site": {"fs.defaultFS": "hdfs://nn:8020"}}}}
        });
        let event = FleetEvent::from_domain_value(Domain::AgentConfigs, body).expect("decode");
        assert_eq!(event.kind(), FleetEventKind::AgentConfigs);

        let invalid = FleetEvent::from_domain_value(Domain::Topology, json!({"event_type": "MERGE"}));
        assert!(matches!(invalid, Err(StateError::InvalidEvent { .. })));
    }
}
