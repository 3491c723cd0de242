use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use fleetsync_core::{ClusterData, Domain, StateHasher, SyncOutcome, UpdateEvent};
use serde_json::Value;
use tracing::debug;

use super::{outcome_value, DomainStore, Snapshot, StoreCore, UpdateSink};
use crate::error::StateError;
use crate::provider::CurrentDataProvider;

type Slot<C> = Arc<Mutex<Snapshot<C>>>;

/// One snapshot per host. Each host has its own lock, so hosts never wait
/// on each other.
pub struct HostScopedStore<C> {
    core: StoreCore<C>,
    hosts: DashMap<String, Slot<C>>,
}

impl<C: ClusterData> HostScopedStore<C> {
    pub fn new(
        domain: Domain,
        provider: Arc<dyn CurrentDataProvider<C>>,
        sink: Arc<dyn UpdateSink<C>>,
    ) -> Self {
        Self::with_hasher(domain, StateHasher::default(), provider, sink)
    }

    pub fn with_hasher(
        domain: Domain,
        hasher: StateHasher,
        provider: Arc<dyn CurrentDataProvider<C>>,
        sink: Arc<dyn UpdateSink<C>>,
    ) -> Self {
        Self {
            core: StoreCore::new(domain, hasher, provider, sink),
            hosts: DashMap::new(),
        }
    }

    pub fn get_update_if_changed(
        &self,
        host_name: &str,
        agent_hash: &str,
    ) -> Result<SyncOutcome<C>, StateError> {
        if host_name.is_empty() {
            return Err(StateError::MissingHost {
                domain: self.core.domain(),
            });
        }
        let slot = Arc::clone(self.hosts.entry(host_name.to_string()).or_default().value());
        let mut snapshot = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let outcome = self.core.sync(&mut snapshot, agent_hash, Some(host_name));
        if outcome.is_err() && snapshot.is_none() {
            // Failed first build: nothing worth keeping for this host.
            self.hosts
                .remove_if(host_name, |_, current| Arc::ptr_eq(current, &slot));
        }
        outcome
    }

    /// Merges an event addressed to `event.host_name`. Hosts that were never
    /// queried have nothing to merge into and are skipped.
    pub fn update_data(&self, event: &UpdateEvent<C>) -> Result<bool, StateError> {
        let Some(host_name) = event.host_name.as_deref() else {
            return Err(StateError::MissingHost {
                domain: self.core.domain(),
            });
        };
        let Some(slot) = self.hosts.get(host_name).map(|entry| Arc::clone(entry.value())) else {
            debug!(
                event = "update_skipped_unknown_host",
                domain = self.core.domain().as_str(),
                host_name,
                "no snapshot for host"
            );
            return Ok(false);
        };
        let mut snapshot = slot.lock().unwrap_or_else(PoisonError::into_inner);
        self.core.apply(&mut snapshot, event)
    }

    pub fn evict_host(&self, host_name: &str) -> bool {
        let removed = self.hosts.remove(host_name).is_some();
        if removed {
            debug!(
                event = "host_snapshot_evicted",
                domain = self.core.domain().as_str(),
                host_name,
                "host snapshot purged"
            );
        }
        removed
    }

    pub fn current_hash(&self, host_name: &str) -> Option<String> {
        let slot = self.hosts.get(host_name).map(|entry| Arc::clone(entry.value()))?;
        let snapshot = slot.lock().unwrap_or_else(PoisonError::into_inner);
        snapshot.as_ref().map(|hashed| hashed.hash().to_string())
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn build_count(&self) -> u64 {
        self.core.builds()
    }
}

impl<C: ClusterData> DomainStore for HostScopedStore<C> {
    fn domain(&self) -> Domain {
        self.core.domain()
    }

    fn sync_value(&self, agent_hash: &str, host_name: Option<&str>) -> Result<Value, StateError> {
        let outcome = self.get_update_if_changed(host_name.unwrap_or(""), agent_hash)?;
        outcome_value(self.core.domain(), &outcome)
    }

    fn evict_host(&self, host_name: &str) -> bool {
        HostScopedStore::evict_host(self, host_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderError;
    use fleetsync_core::alerts::{AlertCluster, AlertDefinition, AlertScope};
    use fleetsync_core::ClusterMap;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    struct NullSink;

    impl UpdateSink<AlertCluster> for NullSink {
        fn publish(&self, _domain: Domain, _event: &UpdateEvent<AlertCluster>) {}
    }

    fn definition(definition_id: u64, host_name: &str) -> AlertDefinition {
        AlertDefinition {
            definition_id,
            name: format!("{host_name}_disk"),
            label: None,
            description: None,
            service_name: "AMBARI".to_string(),
            component_name: "AMBARI_AGENT".to_string(),
            interval_minutes: 1,
            enabled: true,
            scope: AlertScope::Host,
            source: Value::Null,
        }
    }

    fn store(calls: Arc<AtomicUsize>) -> HostScopedStore<AlertCluster> {
        let provider = move |host_name: Option<&str>| -> Result<ClusterMap<AlertCluster>, ProviderError> {
            calls.fetch_add(1, Ordering::SeqCst);
            let host_name = host_name.ok_or_else(|| ProviderError::new("host required"))?;
            let cluster = AlertCluster {
                alert_definitions: BTreeMap::from([(1, definition(1, host_name))]),
                stale_interval_multiplier: None,
            };
            Ok(BTreeMap::from([("c1".to_string(), cluster)]))
        };
        HostScopedStore::new(Domain::AlertDefinitions, Arc::new(provider), Arc::new(NullSink))
    }

    #[test]
    fn hosts_get_independent_snapshots() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = store(calls.clone());
        let h1 = store.get_update_if_changed("h1", "").expect("h1").hash().map(str::to_string);
        let h2 = store.get_update_if_changed("h2", "").expect("h2").hash().map(str::to_string);
        assert_ne!(h1, h2);
        assert_eq!(store.host_count(), 2);

        let h1 = h1.expect("hash");
        assert!(store.get_update_if_changed("h1", &h1).expect("again").is_unchanged());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn evicted_host_is_rebuilt_on_next_query() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = store(calls.clone());
        let hash = store
            .get_update_if_changed("h1", "")
            .expect("sync")
            .hash()
            .expect("hash")
            .to_string();

        assert!(store.evict_host("h1"));
        assert!(!store.evict_host("h1"));
        assert!(store.current_hash("h1").is_none());

        let rebuilt = store.get_update_if_changed("h1", &hash).expect("rebuild");
        assert!(rebuilt.is_unchanged());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn updates_need_a_host_name() {
        let store = store(Arc::new(AtomicUsize::new(0)));
        let event = UpdateEvent::update(BTreeMap::new());
        assert_eq!(
            store.update_data(&event),
            Err(StateError::MissingHost {
                domain: Domain::AlertDefinitions
            })
        );
        assert_eq!(store.update_data(&event.for_host("never-seen")), Ok(false));
    }

    #[test]
    fn failed_build_leaves_no_host_slot() {
        let provider = |_: Option<&str>| -> Result<ClusterMap<AlertCluster>, ProviderError> {
            Err(ProviderError::new("database offline"))
        };
        let store =
            HostScopedStore::new(Domain::AlertDefinitions, Arc::new(provider), Arc::new(NullSink));

        assert!(matches!(
            store.get_update_if_changed("h1", ""),
            Err(StateError::DataUnavailable { .. })
        ));
        assert_eq!(store.host_count(), 0);
        assert!(!store.evict_host("h1"));
    }

    #[test]
    fn empty_host_name_is_a_missing_host() {
        let store = store(Arc::new(AtomicUsize::new(0)));
        assert_eq!(
            store.get_update_if_changed("", ""),
            Err(StateError::MissingHost {
                domain: Domain::AlertDefinitions
            })
        );
        assert_eq!(store.host_count(), 0);
    }

    #[test]
    fn concurrent_queries_for_one_host_build_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(store(calls.clone()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store
                        .get_update_if_changed("h1", "")
                        .expect("sync")
                        .hash()
                        .map(str::to_string)
                })
            })
            .collect();
        let hashes: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().expect("join"))
            .collect();
        assert!(hashes.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
