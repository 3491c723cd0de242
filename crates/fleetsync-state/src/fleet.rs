use std::sync::Arc;

use fleetsync_core::agent_configs::ClusterConfigs;
use fleetsync_core::alerts::AlertCluster;
use fleetsync_core::host_params::HostLevelParamsCluster;
use fleetsync_core::metadata::MetadataCluster;
use fleetsync_core::topology::TopologyCluster;
use fleetsync_core::{ClusterData, Domain, StateHasher};
use tracing::info;

use crate::bus::{FleetEvent, FleetEventBus, FleetEventKind};
use crate::error::StateError;
use crate::provider::CurrentDataProvider;
use crate::store::{ClusterScopedStore, DomainStore, HostScopedStore, UpdateSink};

pub struct FleetProviders {
    pub topology: Arc<dyn CurrentDataProvider<TopologyCluster>>,
    pub metadata: Arc<dyn CurrentDataProvider<MetadataCluster>>,
    pub alert_definitions: Arc<dyn CurrentDataProvider<AlertCluster>>,
    pub host_level_params: Arc<dyn CurrentDataProvider<HostLevelParamsCluster>>,
    pub agent_configs: Arc<dyn CurrentDataProvider<ClusterConfigs>>,
}

/// Every domain store, wired to the event bus that feeds them.
pub struct FleetState {
    pub topology: Arc<ClusterScopedStore<TopologyCluster>>,
    pub metadata: Arc<ClusterScopedStore<MetadataCluster>>,
    pub alert_definitions: Arc<HostScopedStore<AlertCluster>>,
    pub host_level_params: Arc<HostScopedStore<HostLevelParamsCluster>>,
    pub agent_configs: Arc<HostScopedStore<ClusterConfigs>>,
    bus: FleetEventBus,
}

impl FleetState {
    pub fn new<S>(providers: FleetProviders, sink: Arc<S>) -> Self
    where
        S: UpdateSink<TopologyCluster>
            + UpdateSink<MetadataCluster>
            + UpdateSink<AlertCluster>
            + UpdateSink<HostLevelParamsCluster>
            + UpdateSink<ClusterConfigs>
            + 'static,
    {
        Self::with_hasher(providers, sink, StateHasher::default())
    }

    pub fn with_hasher<S>(providers: FleetProviders, sink: Arc<S>, hasher: StateHasher) -> Self
    where
        S: UpdateSink<TopologyCluster>
            + UpdateSink<MetadataCluster>
            + UpdateSink<AlertCluster>
            + UpdateSink<HostLevelParamsCluster>
            + UpdateSink<ClusterConfigs>
            + 'static,
    {
        let state = Self {
            topology: Arc::new(ClusterScopedStore::with_hasher(
                Domain::Topology,
                hasher.clone(),
                providers.topology,
                sink.clone(),
            )),
            metadata: Arc::new(ClusterScopedStore::with_hasher(
                Domain::Metadata,
                hasher.clone(),
                providers.metadata,
                sink.clone(),
            )),
            alert_definitions: Arc::new(HostScopedStore::with_hasher(
                Domain::AlertDefinitions,
                hasher.clone(),
                providers.alert_definitions,
                sink.clone(),
            )),
            host_level_params: Arc::new(HostScopedStore::with_hasher(
                Domain::HostLevelParams,
                hasher.clone(),
                providers.host_level_params,
                sink.clone(),
            )),
            agent_configs: Arc::new(HostScopedStore::with_hasher(
                Domain::AgentConfigs,
                hasher,
                providers.agent_configs,
                sink,
            )),
            bus: FleetEventBus::new(),
        };
        state.wire_bus();
        state
    }

    fn wire_bus(&self) {
        let topology = Arc::clone(&self.topology);
        self.bus.register(FleetEventKind::Topology, move |event| match event {
            FleetEvent::Topology(update) => topology.update_data(update).map(drop),
            _ => Ok(()),
        });
        let metadata = Arc::clone(&self.metadata);
        self.bus.register(FleetEventKind::Metadata, move |event| match event {
            FleetEvent::Metadata(update) => metadata.update_data(update).map(drop),
            _ => Ok(()),
        });
        let alerts = Arc::clone(&self.alert_definitions);
        self.bus
            .register(FleetEventKind::AlertDefinitions, move |event| match event {
                FleetEvent::AlertDefinitions(update) => alerts.update_data(update).map(drop),
                _ => Ok(()),
            });
        let params = Arc::clone(&self.host_level_params);
        self.bus
            .register(FleetEventKind::HostLevelParams, move |event| match event {
                FleetEvent::HostLevelParams(update) => params.update_data(update).map(drop),
                _ => Ok(()),
            });
        let configs = Arc::clone(&self.agent_configs);
        self.bus
            .register(FleetEventKind::AgentConfigs, move |event| match event {
                FleetEvent::AgentConfigs(update) => configs.update_data(update).map(drop),
                _ => Ok(()),
            });

        for store in self.host_scoped() {
            self.bus.register(FleetEventKind::HostRemoved, move |event| {
                if let FleetEvent::HostRemoved { host_name } = event {
                    store.evict_host(host_name);
                }
                Ok(())
            });
        }
    }

    fn host_scoped(&self) -> Vec<Arc<dyn DomainStore>> {
        vec![
            share(&self.alert_definitions),
            share(&self.host_level_params),
            share(&self.agent_configs),
        ]
    }

    pub fn bus(&self) -> &FleetEventBus {
        &self.bus
    }

    pub fn publish(&self, event: &FleetEvent) -> Result<usize, StateError> {
        self.bus.publish(event)
    }

    pub fn on_host_removed(&self, host_name: &str) -> Result<usize, StateError> {
        info!(event = "host_removed", host_name, "purging host-scoped snapshots");
        self.bus.publish(&FleetEvent::HostRemoved {
            host_name: host_name.to_string(),
        })
    }

    pub fn store(&self, domain: Domain) -> &dyn DomainStore {
        match domain {
            Domain::Topology => self.topology.as_ref(),
            Domain::Metadata => self.metadata.as_ref(),
            Domain::AlertDefinitions => self.alert_definitions.as_ref(),
            Domain::HostLevelParams => self.host_level_params.as_ref(),
            Domain::AgentConfigs => self.agent_configs.as_ref(),
        }
    }
}

fn share<C: ClusterData>(store: &Arc<HostScopedStore<C>>) -> Arc<dyn DomainStore> {
    Arc::clone(store) as Arc<dyn DomainStore>
}
