use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::{overlay_map, remove_keys, remove_set, union_set, ClusterData};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HostLevelParamsCluster {
    #[serde(default)]
    pub recovery_config: RecoveryConfig,
    #[serde(default)]
    pub host_repositories: HostRepositories,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default)]
    pub enabled_components: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HostRepositories {
    #[serde(default)]
    pub repositories: BTreeMap<u64, Repository>,
    /// component name -> repository id
    #[serde(default)]
    pub component_repos: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub repo_id: u64,
    pub repo_name: String,
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<String>,
}

impl RecoveryConfig {
    fn is_empty(&self) -> bool {
        self.enabled_components.is_empty() && self.recovery_type.is_none() && self.max_count.is_none()
    }
}

impl ClusterData for HostLevelParamsCluster {
    fn merge_update(&mut self, delta: &Self) -> bool {
        let recovery = &mut self.recovery_config;
        let mut changed = union_set(
            &mut recovery.enabled_components,
            &delta.recovery_config.enabled_components,
        );
        if delta.recovery_config.recovery_type.is_some()
            && recovery.recovery_type != delta.recovery_config.recovery_type
        {
            recovery.recovery_type = delta.recovery_config.recovery_type.clone();
            changed = true;
        }
        if delta.recovery_config.max_count.is_some()
            && recovery.max_count != delta.recovery_config.max_count
        {
            recovery.max_count = delta.recovery_config.max_count;
            changed = true;
        }

        let repos = &mut self.host_repositories;
        changed |= overlay_map(&mut repos.repositories, &delta.host_repositories.repositories);
        changed |= overlay_map(&mut repos.component_repos, &delta.host_repositories.component_repos);
        changed
    }

    fn remove_matching(&mut self, delta: &Self) -> bool {
        let mut changed = remove_set(
            &mut self.recovery_config.enabled_components,
            &delta.recovery_config.enabled_components,
        );
        let repos = &mut self.host_repositories;
        let removed: BTreeSet<u64> = delta
            .host_repositories
            .repositories
            .keys()
            .filter(|repo_id| repos.repositories.remove(*repo_id).is_some())
            .copied()
            .collect();
        changed |= !removed.is_empty();
        changed |= remove_keys(&mut repos.component_repos, &delta.host_repositories.component_repos);
        let mapped = repos.component_repos.len();
        repos
            .component_repos
            .retain(|_, repo_id| !removed.contains(repo_id));
        changed |= repos.component_repos.len() != mapped;
        changed
    }

    fn is_empty(&self) -> bool {
        self.recovery_config.is_empty()
            && self.host_repositories.repositories.is_empty()
            && self.host_repositories.component_repos.is_empty()
    }
}
