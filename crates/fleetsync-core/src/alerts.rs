use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{remove_keys, ClusterData};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AlertCluster {
    #[serde(default)]
    pub alert_definitions: BTreeMap<u64, AlertDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_interval_multiplier: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertScope {
    #[default]
    Any,
    Host,
    Service,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDefinition {
    pub definition_id: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub component_name: String,
    pub interval_minutes: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub scope: AlertScope,
    /// Check source (script, port, web, metric); opaque to the hub.
    #[serde(default)]
    pub source: Value,
}

fn default_enabled() -> bool {
    true
}

impl ClusterData for AlertCluster {
    fn merge_update(&mut self, delta: &Self) -> bool {
        let mut changed = false;
        for (definition_id, definition) in &delta.alert_definitions {
            if self.alert_definitions.get(definition_id) != Some(definition) {
                self.alert_definitions.insert(*definition_id, definition.clone());
                changed = true;
            }
        }
        if delta.stale_interval_multiplier.is_some()
            && self.stale_interval_multiplier != delta.stale_interval_multiplier
        {
            self.stale_interval_multiplier = delta.stale_interval_multiplier;
            changed = true;
        }
        changed
    }

    fn remove_matching(&mut self, delta: &Self) -> bool {
        remove_keys(&mut self.alert_definitions, &delta.alert_definitions)
    }

    fn is_empty(&self) -> bool {
        self.alert_definitions.is_empty()
    }
}
