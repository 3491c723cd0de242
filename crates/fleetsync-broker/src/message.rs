use std::collections::BTreeMap;

use fleetsync_core::{Domain, UpdateEvent};
use serde_json::Value;

/// Headers a published message carries; selectors evaluate against these.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    headers: BTreeMap<String, Value>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn for_event<C>(domain: Domain, event: &UpdateEvent<C>) -> Self {
        let mut message = Self::new()
            .with_header("domain", domain.as_str())
            .with_header("destination", domain.destination())
            .with_header("event_type", event.kind.as_str())
            .with_header("cluster_count", event.clusters.len());
        if let Some(host_name) = &event.host_name {
            message = message.with_header("host_name", host_name.as_str());
        }
        message
    }

    pub fn header(&self, name: &str) -> Option<&Value> {
        self.headers.get(name)
    }

    pub fn headers(&self) -> &BTreeMap<String, Value> {
        &self.headers
    }
}
