use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use fleetsync_core::agent_configs::ClusterConfigs;
use fleetsync_core::alerts::AlertCluster;
use fleetsync_core::host_params::HostLevelParamsCluster;
use fleetsync_core::metadata::MetadataCluster;
use fleetsync_core::topology::TopologyCluster;
use fleetsync_core::wire::ComponentStatusReport;
use fleetsync_core::{ClusterData, ClusterMap};
use fleetsync_state::{CurrentDataProvider, FleetProviders, ProviderError, ReportSink};
use serde::Deserialize;
use tracing::info;

/// Host-scoped seed data: per-host overrides on top of a shared default.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound = "C: ClusterData")]
pub struct HostSeed<C> {
    #[serde(default = "BTreeMap::new")]
    pub defaults: ClusterMap<C>,
    #[serde(default = "BTreeMap::new")]
    pub hosts: BTreeMap<String, ClusterMap<C>>,
}

impl<C> Default for HostSeed<C> {
    fn default() -> Self {
        Self {
            defaults: BTreeMap::new(),
            hosts: BTreeMap::new(),
        }
    }
}

/// Current data the hub serves when no controller is attached.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SeedState {
    pub topology: ClusterMap<TopologyCluster>,
    pub metadata: ClusterMap<MetadataCluster>,
    pub alert_definitions: HostSeed<AlertCluster>,
    pub host_level_params: HostSeed<HostLevelParamsCluster>,
    pub agent_configs: HostSeed<ClusterConfigs>,
}

impl SeedState {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn into_providers(self) -> FleetProviders {
        FleetProviders {
            topology: Arc::new(ClusterSource(self.topology)),
            metadata: Arc::new(ClusterSource(self.metadata)),
            alert_definitions: Arc::new(self.alert_definitions),
            host_level_params: Arc::new(self.host_level_params),
            agent_configs: Arc::new(self.agent_configs),
        }
    }
}

struct ClusterSource<C>(ClusterMap<C>);

impl<C: ClusterData> CurrentDataProvider<C> for ClusterSource<C> {
    fn fetch_current(&self, _host_name: Option<&str>) -> Result<ClusterMap<C>, ProviderError> {
        Ok(self.0.clone())
    }
}

impl<C: ClusterData> CurrentDataProvider<C> for HostSeed<C> {
    fn fetch_current(&self, host_name: Option<&str>) -> Result<ClusterMap<C>, ProviderError> {
        let host_name = host_name.ok_or_else(|| ProviderError::new("host name required"))?;
        Ok(self
            .hosts
            .get(host_name)
            .unwrap_or(&self.defaults)
            .clone())
    }
}

/// Writes component status reports to the log.
pub struct LogReportSink;

impl ReportSink for LogReportSink {
    fn component_status(&self, host_name: &str, reports: &[ComponentStatusReport]) {
        for report in reports {
            info!(
                event = "component_status",
                host_name,
                cluster_id = report.cluster_id.as_str(),
                service_name = report.service_name.as_str(),
                component_name = report.component_name.as_str(),
                status = report.status.as_str(),
                command = report.command.as_deref().unwrap_or("")
            );
        }
    }
}
