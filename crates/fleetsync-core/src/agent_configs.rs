use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{overlay_sections, remove_sections, ClusterData};

pub type ConfigAttributes = BTreeMap<String, BTreeMap<String, String>>;

/// Desired service configuration as seen by one host.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterConfigs {
    /// config type -> key -> value
    #[serde(default)]
    pub configurations: BTreeMap<String, BTreeMap<String, String>>,
    /// config type -> attribute -> key -> value
    #[serde(default)]
    pub configuration_attributes: BTreeMap<String, ConfigAttributes>,
}

impl ClusterData for ClusterConfigs {
    fn merge_update(&mut self, delta: &Self) -> bool {
        let mut changed = overlay_sections(&mut self.configurations, &delta.configurations);
        for (config_type, attributes) in &delta.configuration_attributes {
            if attributes.is_empty() {
                continue;
            }
            let existing = self
                .configuration_attributes
                .entry(config_type.clone())
                .or_default();
            changed |= overlay_sections(existing, attributes);
        }
        changed
    }

    fn remove_matching(&mut self, delta: &Self) -> bool {
        let mut changed = remove_sections(&mut self.configurations, &delta.configurations);
        for (config_type, attributes) in &delta.configuration_attributes {
            let Some(existing) = self.configuration_attributes.get_mut(config_type) else {
                continue;
            };
            if attributes.is_empty() {
                self.configuration_attributes.remove(config_type);
                changed = true;
                continue;
            }
            changed |= remove_sections(existing, attributes);
            if existing.is_empty() {
                self.configuration_attributes.remove(config_type);
            }
        }
        changed
    }

    fn is_empty(&self) -> bool {
        self.configurations.is_empty() && self.configuration_attributes.is_empty()
    }
}
