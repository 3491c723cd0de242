use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fleetsync_core::{ClusterData, Domain, StateHasher, SyncOutcome, UpdateEvent};
use serde_json::Value;

use super::{outcome_value, DomainStore, Snapshot, StoreCore, UpdateSink};
use crate::error::StateError;
use crate::provider::CurrentDataProvider;

/// One snapshot shared by the whole fleet, built lazily on first request.
pub struct ClusterScopedStore<C> {
    core: StoreCore<C>,
    snapshot: Mutex<Snapshot<C>>,
}

impl<C: ClusterData> ClusterScopedStore<C> {
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
            snapshot: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Snapshot<C>> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_update_if_changed(&self, agent_hash: &str) -> Result<SyncOutcome<C>, StateError> {
        let mut snapshot = self.lock();
        self.core.sync(&mut snapshot, agent_hash, None)
    }

    /// Builds the snapshot first if no agent has asked for it yet, so
    /// subscribers see the event either way.
    pub fn update_data(&self, event: &UpdateEvent<C>) -> Result<bool, StateError> {
        let mut snapshot = self.lock();
        if snapshot.is_none() {
            *snapshot = Some(self.core.build(None)?);
        }
        self.core.apply(&mut snapshot, event)
    }

    pub fn current_hash(&self) -> Option<String> {
        self.lock()
            .as_ref()
            .map(|snapshot| snapshot.hash().to_string())
    }

    pub fn build_count(&self) -> u64 {
        self.core.builds()
    }
}

impl<C: ClusterData> DomainStore for ClusterScopedStore<C> {
    fn domain(&self) -> Domain {
        self.core.domain()
    }

    fn sync_value(&self, agent_hash: &str, _host_name: Option<&str>) -> Result<Value, StateError> {
        let outcome = self.get_update_if_changed(agent_hash)?;
        outcome_value(self.core.domain(), &outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderError;
    use fleetsync_core::metadata::MetadataCluster;
    use fleetsync_core::ClusterMap;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<UpdateEvent<MetadataCluster>>>,
    }

    impl UpdateSink<MetadataCluster> for RecordingSink {
        fn publish(&self, _domain: Domain, event: &UpdateEvent<MetadataCluster>) {
            self.events.lock().expect("lock").push(event.clone());
        }
    }

    struct CountingProvider {
        calls: AtomicUsize,
        failing: AtomicBool,
    }

    impl CurrentDataProvider<MetadataCluster> for CountingProvider {
        fn fetch_current(
            &self,
            _host_name: Option<&str>,
        ) -> Result<ClusterMap<MetadataCluster>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(ProviderError::new("database offline"));
            }
            let cluster = MetadataCluster {
                cluster_level_params: BTreeMap::from([("stack".to_string(), "HDP".to_string())]),
                ..MetadataCluster::default()
            };
            Ok(BTreeMap::from([("c1".to_string(), cluster)]))
        }
    }

    fn store() -> (
        ClusterScopedStore<MetadataCluster>,
        Arc<CountingProvider>,
        Arc<RecordingSink>,
    ) {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        });
        let sink = Arc::new(RecordingSink::default());
        let store = ClusterScopedStore::new(Domain::Metadata, provider.clone(), sink.clone());
        (store, provider, sink)
    }

    fn jdk_update(value: &str) -> UpdateEvent<MetadataCluster> {
        let cluster = MetadataCluster {
            cluster_level_params: BTreeMap::from([("jdk".to_string(), value.to_string())]),
            ..MetadataCluster::default()
        };
        UpdateEvent::update(BTreeMap::from([("c1".to_string(), cluster)]))
    }

    #[test]
    fn current_hash_is_answered_without_rebuilding() {
        let (store, provider, _) = store();
        let first = store.get_update_if_changed("").expect("first sync");
        let hash = first.hash().expect("hash").to_string();

        assert!(store.get_update_if_changed(&hash).expect("second").is_unchanged());
        assert!(store.get_update_if_changed(&hash).expect("third").is_unchanged());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.build_count(), 1);
    }

    #[test]
    fn stale_or_empty_hash_returns_the_full_snapshot() {
        let (store, _, _) = store();
        let first = store.get_update_if_changed("stale").expect("sync");
        let event = first.event().expect("changed");
        assert_eq!(event.kind, fleetsync_core::EventKind::Create);
        assert!(event.clusters.contains_key("c1"));
        assert!(store.get_update_if_changed("").expect("empty").event().is_some());
    }

    #[test]
    fn merged_update_changes_the_hash_and_is_published() {
        let (store, _, sink) = store();
        let before = store.get_update_if_changed("").expect("sync");
        let old_hash = before.hash().expect("hash").to_string();

        assert_eq!(store.update_data(&jdk_update("11")), Ok(true));
        let new_hash = store.current_hash().expect("hash");
        assert_ne!(new_hash, old_hash);
        assert!(!store.get_update_if_changed(&old_hash).expect("sync").is_unchanged());

        let published = sink.events.lock().expect("lock");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].hash.as_deref(), Some(new_hash.as_str()));
    }

    #[test]
    fn no_op_update_is_not_broadcast() {
        let (store, _, sink) = store();
        store.get_update_if_changed("").expect("sync");
        assert_eq!(store.update_data(&jdk_update("11")), Ok(true));
        assert_eq!(store.update_data(&jdk_update("11")), Ok(false));
        assert_eq!(sink.events.lock().expect("lock").len(), 1);
    }

    #[test]
    fn rejected_update_leaves_the_snapshot_untouched() {
        let (store, _, sink) = store();
        store.get_update_if_changed("").expect("sync");
        let hash = store.current_hash();

        let mut event = jdk_update("11");
        let unknown = event.clusters.remove("c1").expect("cluster");
        event.clusters.insert("c7".to_string(), unknown);
        assert!(matches!(
            store.update_data(&event),
            Err(StateError::InconsistentUpdate { .. })
        ));
        assert_eq!(store.current_hash(), hash);
        assert!(sink.events.lock().expect("lock").is_empty());
    }

    #[test]
    fn update_before_first_sync_builds_then_merges() {
        let (store, provider, sink) = store();
        assert_eq!(store.update_data(&jdk_update("11")), Ok(true));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let published = sink.events.lock().expect("lock");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].hash, store.current_hash());
        drop(published);

        let full = store.get_update_if_changed("").expect("sync");
        let cluster = &full.event().expect("changed").clusters["c1"];
        assert_eq!(cluster.cluster_level_params["jdk"], "11");
        assert_eq!(cluster.cluster_level_params["stack"], "HDP");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn update_before_first_sync_reports_provider_failure() {
        let (store, provider, sink) = store();
        provider.failing.store(true, Ordering::SeqCst);
        assert!(matches!(
            store.update_data(&jdk_update("11")),
            Err(StateError::DataUnavailable { .. })
        ));
        assert!(store.current_hash().is_none());
        assert!(sink.events.lock().expect("lock").is_empty());
    }

    #[test]
    fn provider_failure_surfaces_and_keeps_prior_state() {
        let (store, provider, _) = store();
        provider.failing.store(true, Ordering::SeqCst);
        assert!(matches!(
            store.get_update_if_changed(""),
            Err(StateError::DataUnavailable { .. })
        ));
        assert!(store.current_hash().is_none());

        provider.failing.store(false, Ordering::SeqCst);
        let hash = store.get_update_if_changed("").expect("sync").hash().map(str::to_string);
        provider.failing.store(true, Ordering::SeqCst);
        let again = store.get_update_if_changed("").expect("served from snapshot");
        assert_eq!(again.hash().map(str::to_string), hash);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }
}
