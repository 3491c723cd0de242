use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::ClusterData;

pub type ClusterMap<C> = BTreeMap<String, C>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Create => "CREATE",
            EventKind::Update => "UPDATE",
            EventKind::Delete => "DELETE",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change keyed by cluster id. Domain events arrive without a hash;
/// the store stamps the hash of the resulting snapshot before fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEvent<C> {
    #[serde(rename = "event_type")]
    pub kind: EventKind,
    #[serde(default = "BTreeMap::new")]
    pub clusters: ClusterMap<C>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl<C> UpdateEvent<C> {
    pub fn new(kind: EventKind, clusters: ClusterMap<C>) -> Self {
        Self {
            kind,
            clusters,
            host_name: None,
            hash: None,
        }
    }

    pub fn create(clusters: ClusterMap<C>) -> Self {
        Self::new(EventKind::Create, clusters)
    }

    pub fn update(clusters: ClusterMap<C>) -> Self {
        Self::new(EventKind::Update, clusters)
    }

    pub fn delete(clusters: ClusterMap<C>) -> Self {
        Self::new(EventKind::Delete, clusters)
    }

    pub fn for_host(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = Some(host_name.into());
        self
    }

}

impl<C: ClusterData> UpdateEvent<C> {
    /// Copy of the event as it goes on the wire. Only DELETE events are
    /// redacted; other kinds are returned as-is.
    pub fn redacted_for_delete(&self) -> Self {
        let mut outbound = self.clone();
        if outbound.kind == EventKind::Delete {
            for cluster in outbound.clusters.values_mut() {
                cluster.redact_for_delete();
            }
        }
        outbound
    }
}

/// Answer to a hash query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "event", rename_all = "snake_case")]
pub enum SyncOutcome<C> {
    Unchanged,
    Changed(UpdateEvent<C>),
}

impl<C> SyncOutcome<C> {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, SyncOutcome::Unchanged)
    }

    pub fn event(&self) -> Option<&UpdateEvent<C>> {
        match self {
            SyncOutcome::Unchanged => None,
            SyncOutcome::Changed(event) => Some(event),
        }
    }

    pub fn hash(&self) -> Option<&str> {
        self.event().and_then(|event| event.hash.as_deref())
    }
}
