use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::{
    overlay_map, overlay_sections, remove_keys, remove_sections, remove_set, union_set,
    ClusterData,
};

/// Cluster-wide parameters every agent needs regardless of its host.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetadataCluster {
    #[serde(default)]
    pub status_commands_to_run: BTreeSet<String>,
    #[serde(default)]
    pub agent_configs: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub cluster_level_params: BTreeMap<String, String>,
    #[serde(default)]
    pub service_level_params: BTreeMap<String, BTreeMap<String, String>>,
}

impl ClusterData for MetadataCluster {
    fn merge_update(&mut self, delta: &Self) -> bool {
        let mut changed = union_set(&mut self.status_commands_to_run, &delta.status_commands_to_run);
        changed |= overlay_sections(&mut self.agent_configs, &delta.agent_configs);
        changed |= overlay_map(&mut self.cluster_level_params, &delta.cluster_level_params);
        changed |= overlay_sections(&mut self.service_level_params, &delta.service_level_params);
        changed
    }

    fn remove_matching(&mut self, delta: &Self) -> bool {
        let mut changed = remove_set(&mut self.status_commands_to_run, &delta.status_commands_to_run);
        changed |= remove_sections(&mut self.agent_configs, &delta.agent_configs);
        changed |= remove_keys(&mut self.cluster_level_params, &delta.cluster_level_params);
        changed |= remove_sections(&mut self.service_level_params, &delta.service_level_params);
        changed
    }

    fn is_empty(&self) -> bool {
        self.status_commands_to_run.is_empty()
            && self.agent_configs.is_empty()
            && self.cluster_level_params.is_empty()
            && self.service_level_params.is_empty()
    }
}
