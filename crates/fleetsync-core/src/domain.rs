use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fmt::Debug;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// One snapshot shared by every agent.
    Cluster,
    /// One snapshot per registered host.
    Host,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Topology,
    Metadata,
    AlertDefinitions,
    HostLevelParams,
    AgentConfigs,
}

impl Domain {
    pub const ALL: [Domain; 5] = [
        Domain::Topology,
        Domain::Metadata,
        Domain::AlertDefinitions,
        Domain::HostLevelParams,
        Domain::AgentConfigs,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Topology => "topology",
            Domain::Metadata => "metadata",
            Domain::AlertDefinitions => "alert_definitions",
            Domain::HostLevelParams => "host_level_params",
            Domain::AgentConfigs => "agent_configs",
        }
    }

    /// Destination agents subscribe to for this domain's updates.
    pub fn destination(self) -> &'static str {
        match self {
            Domain::Topology => "/events/topologies",
            Domain::Metadata => "/events/metadata",
            Domain::AlertDefinitions => "/user/alert_definitions",
            Domain::HostLevelParams => "/user/host_level_params",
            Domain::AgentConfigs => "/user/configs",
        }
    }

    pub fn scope(self) -> Scope {
        match self {
            Domain::Topology | Domain::Metadata => Scope::Cluster,
            Domain::AlertDefinitions | Domain::HostLevelParams | Domain::AgentConfigs => {
                Scope::Host
            }
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Domain::ALL
            .into_iter()
            .find(|domain| domain.as_str() == value)
            .ok_or_else(|| SyncError::UnknownDomain(value.to_string()))
    }
}

/// Per-cluster payload of a state domain.
///
/// `merge_update` and `remove_matching` report whether anything changed so
/// callers can skip rehashing and broadcasting no-op events.
pub trait ClusterData:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn merge_update(&mut self, delta: &Self) -> bool;

    fn remove_matching(&mut self, delta: &Self) -> bool;

    fn is_empty(&self) -> bool;

    /// Strips fields that must not be fanned out with a DELETE event.
    fn redact_for_delete(&mut self) {}
}

pub(crate) fn overlay_map<K, V>(target: &mut BTreeMap<K, V>, delta: &BTreeMap<K, V>) -> bool
where
    K: Ord + Clone,
    V: PartialEq + Clone,
{
    let mut changed = false;
    for (key, value) in delta {
        if target.get(key) != Some(value) {
            target.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}

pub(crate) fn remove_keys<K: Ord, V, W>(target: &mut BTreeMap<K, V>, delta: &BTreeMap<K, W>) -> bool {
    let mut changed = false;
    for key in delta.keys() {
        changed |= target.remove(key).is_some();
    }
    changed
}

pub(crate) fn union_set<T: Ord + Clone>(target: &mut BTreeSet<T>, delta: &BTreeSet<T>) -> bool {
    let mut changed = false;
    for value in delta {
        changed |= target.insert(value.clone());
    }
    changed
}

pub(crate) fn remove_set<T: Ord>(target: &mut BTreeSet<T>, delta: &BTreeSet<T>) -> bool {
    let mut changed = false;
    for value in delta {
        changed |= target.remove(value);
    }
    changed
}

pub(crate) fn overlay_sections<K, V>(
    target: &mut BTreeMap<String, BTreeMap<K, V>>,
    delta: &BTreeMap<String, BTreeMap<K, V>>,
) -> bool
where
    K: Ord + Clone,
    V: PartialEq + Clone,
{
    let mut changed = false;
    for (section, entries) in delta {
        match target.get_mut(section) {
            Some(existing) => changed |= overlay_map(existing, entries),
            None => {
                target.insert(section.clone(), entries.clone());
                changed = true;
            }
        }
    }
    changed
}

/// A section listed without entries is removed whole; otherwise only the
/// listed keys go, and a section left empty is dropped.
pub(crate) fn remove_sections<K: Ord, V>(
    target: &mut BTreeMap<String, BTreeMap<K, V>>,
    delta: &BTreeMap<String, BTreeMap<K, V>>,
) -> bool {
    let mut changed = false;
    for (section, entries) in delta {
        let Some(existing) = target.get_mut(section) else {
            continue;
        };
        if entries.is_empty() {
            target.remove(section);
            changed = true;
            continue;
        }
        changed |= remove_keys(existing, entries);
        if existing.is_empty() {
            target.remove(section);
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domains_round_trip_through_their_names() {
        for domain in Domain::ALL {
            assert_eq!(domain.as_str().parse::<Domain>().ok(), Some(domain));
        }
        assert_eq!(
            "inventory".parse::<Domain>(),
            Err(SyncError::UnknownDomain("inventory".to_string()))
        );
    }

    #[test]
    fn scope_follows_destination_family() {
        for domain in Domain::ALL {
            let host_scoped = domain.destination().starts_with("/user/");
            assert_eq!(domain.scope() == Scope::Host, host_scoped, "{domain}");
        }
    }

    #[test]
    fn overlay_reports_only_real_changes() {
        let mut target = BTreeMap::from([("a".to_string(), 1)]);
        assert!(!overlay_map(&mut target, &BTreeMap::from([("a".to_string(), 1)])));
        assert!(overlay_map(&mut target, &BTreeMap::from([("a".to_string(), 2)])));
        assert_eq!(target.get("a"), Some(&2));
    }

    #[test]
    fn empty_section_in_delta_removes_the_whole_section() {
        let mut target = BTreeMap::from([
            ("core".to_string(), BTreeMap::from([("k".to_string(), "v".to_string())])),
            (
                "hdfs".to_string(),
                BTreeMap::from([
                    ("a".to_string(), "1".to_string()),
                    ("b".to_string(), "2".to_string()),
                ]),
            ),
        ]);
        let delta = BTreeMap::from([
            ("core".to_string(), BTreeMap::new()),
            ("hdfs".to_string(), BTreeMap::from([("a".to_string(), String::new())])),
        ]);

        assert!(remove_sections(&mut target, &delta));
        assert!(!target.contains_key("core"));
        assert_eq!(target["hdfs"].len(), 1);
    }
}
