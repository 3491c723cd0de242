use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::{overlay_map, remove_set, union_set, ClusterData};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TopologyCluster {
    #[serde(default)]
    pub components: BTreeMap<String, TopologyComponent>,
    #[serde(default)]
    pub hosts: BTreeMap<u64, TopologyHost>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TopologyComponent {
    #[serde(default)]
    pub service_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub host_ids: BTreeSet<u64>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub host_names: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub component_level_params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TopologyHost {
    pub host_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rack_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_v4: Option<String>,
}

impl TopologyComponent {
    fn merge(&mut self, delta: &TopologyComponent) -> bool {
        let mut changed = false;
        if !delta.service_name.is_empty() && self.service_name != delta.service_name {
            self.service_name = delta.service_name.clone();
            changed = true;
        }
        if delta.version.is_some() && self.version != delta.version {
            self.version = delta.version.clone();
            changed = true;
        }
        changed |= union_set(&mut self.host_ids, &delta.host_ids);
        changed |= union_set(&mut self.host_names, &delta.host_names);
        changed |= overlay_map(&mut self.component_level_params, &delta.component_level_params);
        changed
    }

    fn lists_hosts(&self) -> bool {
        !self.host_ids.is_empty() || !self.host_names.is_empty()
    }

    /// Drops the given host ids together with the names they resolve to.
    fn remove_hosts(&mut self, host_ids: &BTreeSet<u64>, hosts: &BTreeMap<u64, TopologyHost>) -> bool {
        let mut changed = remove_set(&mut self.host_ids, host_ids);
        for host_id in host_ids {
            if let Some(host) = hosts.get(host_id) {
                changed |= self.host_names.remove(&host.host_name);
            }
        }
        changed
    }
}

impl TopologyHost {
    fn merge(&mut self, delta: &TopologyHost) -> bool {
        let mut changed = false;
        if !delta.host_name.is_empty() && self.host_name != delta.host_name {
            self.host_name = delta.host_name.clone();
            changed = true;
        }
        if delta.rack_name.is_some() && self.rack_name != delta.rack_name {
            self.rack_name = delta.rack_name.clone();
            changed = true;
        }
        if delta.ip_v4.is_some() && self.ip_v4 != delta.ip_v4 {
            self.ip_v4 = delta.ip_v4.clone();
            changed = true;
        }
        changed
    }
}

impl ClusterData for TopologyCluster {
    fn merge_update(&mut self, delta: &Self) -> bool {
        let mut changed = false;
        for (name, incoming) in &delta.components {
            match self.components.get_mut(name) {
                Some(existing) => changed |= existing.merge(incoming),
                None => {
                    self.components.insert(name.clone(), incoming.clone());
                    changed = true;
                }
            }
        }
        for (host_id, incoming) in &delta.hosts {
            match self.hosts.get_mut(host_id) {
                Some(existing) => changed |= existing.merge(incoming),
                None => {
                    self.hosts.insert(*host_id, incoming.clone());
                    changed = true;
                }
            }
        }
        changed
    }

    fn remove_matching(&mut self, delta: &Self) -> bool {
        let mut changed = false;
        for (name, incoming) in &delta.components {
            let Some(existing) = self.components.get_mut(name) else {
                continue;
            };
            if !incoming.lists_hosts() {
                self.components.remove(name);
                changed = true;
                continue;
            }
            changed |= existing.remove_hosts(&incoming.host_ids, &self.hosts);
            changed |= remove_set(&mut existing.host_names, &incoming.host_names);
            if existing.host_ids.is_empty() {
                self.components.remove(name);
            }
        }

        let removed_hosts: BTreeMap<u64, TopologyHost> = delta
            .hosts
            .keys()
            .filter_map(|host_id| self.hosts.remove_entry(host_id))
            .collect();
        if !removed_hosts.is_empty() {
            changed = true;
            let removed_ids: BTreeSet<u64> = removed_hosts.keys().copied().collect();
            // Components must not keep pointing at hosts that left the cluster.
            self.components.retain(|_, component| {
                component.remove_hosts(&removed_ids, &removed_hosts);
                !component.host_ids.is_empty()
            });
        }
        changed
    }

    fn is_empty(&self) -> bool {
        self.components.is_empty() && self.hosts.is_empty()
    }

    fn redact_for_delete(&mut self) {
        for component in self.components.values_mut() {
            component.host_names.clear();
        }
    }
}
