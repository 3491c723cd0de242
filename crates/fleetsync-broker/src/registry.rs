use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use dashmap::{DashMap, DashSet};
use tracing::{debug, warn};

use crate::error::BrokerError;
use crate::matcher::DestinationMatching;
use crate::message::Message;
use crate::selector::Selector;

pub const DEFAULT_CACHE_LIMIT: usize = 1024;
pub const DEFAULT_SELECTOR_HEADER: &str = "selector";

/// session id -> subscription ids
pub type SubscriberMap = BTreeMap<String, BTreeSet<String>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Upper bound for both the positive and the negative cache; 0 disables caching.
    pub cache_limit: usize,
    pub selector_header: String,
    pub matching: DestinationMatching,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cache_limit: DEFAULT_CACHE_LIMIT,
            selector_header: DEFAULT_SELECTOR_HEADER.to_string(),
            matching: DestinationMatching::Exact,
        }
    }
}

#[derive(Debug)]
pub struct Subscription {
    id: String,
    destination: String,
    selector: Option<Selector>,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn selector(&self) -> Option<&Selector> {
        self.selector.as_ref()
    }
}

#[derive(Debug, Default)]
struct SessionSubscriptions {
    by_destination: BTreeMap<String, BTreeMap<String, Arc<Subscription>>>,
    by_id: BTreeMap<String, Arc<Subscription>>,
}

#[derive(Debug)]
struct SessionSubscriptionInfo {
    session_id: String,
    subscriptions: RwLock<SessionSubscriptions>,
}

impl SessionSubscriptionInfo {
    fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            subscriptions: RwLock::new(SessionSubscriptions::default()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SessionSubscriptions> {
        self.subscriptions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, SessionSubscriptions> {
        self.subscriptions.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, subscription: Arc<Subscription>) -> bool {
        let mut guard = self.write();
        if guard.by_id.contains_key(&subscription.id) {
            return false;
        }
        guard
            .by_destination
            .entry(subscription.destination.clone())
            .or_default()
            .insert(subscription.id.clone(), Arc::clone(&subscription));
        guard.by_id.insert(subscription.id.clone(), subscription);
        true
    }

    fn remove(&self, subscription_id: &str) -> Option<Arc<Subscription>> {
        let mut guard = self.write();
        let removed = guard.by_id.remove(subscription_id)?;
        if let Some(subscriptions) = guard.by_destination.get_mut(&removed.destination) {
            subscriptions.remove(subscription_id);
            if subscriptions.is_empty() {
                guard.by_destination.remove(&removed.destination);
            }
        }
        Some(removed)
    }

    fn get(&self, subscription_id: &str) -> Option<Arc<Subscription>> {
        self.read().by_id.get(subscription_id).cloned()
    }

    fn matching_ids(&self, destination: &str, matching: DestinationMatching) -> BTreeSet<String> {
        let guard = self.read();
        match matching {
            DestinationMatching::Exact => guard
                .by_destination
                .get(destination)
                .map(|subscriptions| subscriptions.keys().cloned().collect())
                .unwrap_or_default(),
            DestinationMatching::Pattern => guard
                .by_destination
                .iter()
                .filter(|(subscribed, _)| matching.matches(subscribed, destination))
                .flat_map(|(_, subscriptions)| subscriptions.keys().cloned())
                .collect(),
        }
    }

    fn len(&self) -> usize {
        self.read().by_id.len()
    }
}

#[derive(Debug, Default)]
struct CacheOrder {
    generation: u64,
    positive: VecDeque<String>,
    negative: VecDeque<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub sessions: usize,
    pub cached_destinations: usize,
    pub negative_destinations: usize,
    pub scans: u64,
    pub cache_hits: u64,
    pub negative_hits: u64,
}

/// Sessions, subscriptions and the destination lookup caches.
///
/// Cache entries are immutable `Arc` snapshots; every subscription mutation
/// replaces the affected entries while holding the `order` lock and bumps the
/// generation, so a scan that raced a mutation is never cached.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    config: RegistryConfig,
    sessions: DashMap<String, Arc<SessionSubscriptionInfo>>,
    access_cache: DashMap<String, Arc<SubscriberMap>>,
    negative_cache: DashSet<String>,
    order: Mutex<CacheOrder>,
    selectors_in_use: AtomicBool,
    scans: AtomicU64,
    cache_hits: AtomicU64,
    negative_hits: AtomicU64,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl SubscriptionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            sessions: DashMap::new(),
            access_cache: DashMap::new(),
            negative_cache: DashSet::new(),
            order: Mutex::new(CacheOrder::default()),
            selectors_in_use: AtomicBool::new(false),
            scans: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            negative_hits: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn lock_order(&self) -> MutexGuard<'_, CacheOrder> {
        self.order.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reads the configured selector header from subscribe headers.
    pub fn selector_from_headers(&self, headers: &BTreeMap<String, String>) -> Option<Selector> {
        let raw = headers.get(&self.config.selector_header)?.trim();
        if raw.is_empty() {
            return None;
        }
        let selector = Selector::parse_lenient(raw);
        if let Some(err) = selector.parse_error() {
            warn!(
                event = "selector_invalid",
                selector = raw,
                error = %err,
                "subscription selector does not parse; it will match nothing"
            );
        }
        Some(selector)
    }

    /// Returns `Ok(false)` when the session already holds `subscription_id`.
    pub fn add_subscription(
        &self,
        session_id: &str,
        subscription_id: &str,
        destination: &str,
        selector: Option<Selector>,
    ) -> Result<bool, BrokerError> {
        for (field, value) in [
            ("session_id", session_id),
            ("subscription_id", subscription_id),
            ("destination", destination),
        ] {
            if value.is_empty() {
                return Err(BrokerError::EmptyIdentifier { field });
            }
        }

        if selector.is_some() {
            self.selectors_in_use.store(true, Ordering::Release);
        }
        let subscription = Arc::new(Subscription {
            id: subscription_id.to_string(),
            destination: destination.to_string(),
            selector,
        });

        loop {
            let info = Arc::clone(
                self.sessions
                    .entry(session_id.to_string())
                    .or_insert_with(|| Arc::new(SessionSubscriptionInfo::new(session_id)))
                    .value(),
            );
            if !info.insert(Arc::clone(&subscription)) {
                return Ok(false);
            }

            let mut order = self.lock_order();
            if !self.is_live(session_id, &info) {
                // Lost a race with unregister_all_subscriptions; retry on a fresh session.
                drop(order);
                info.remove(subscription_id);
                continue;
            }
            order.generation += 1;
            self.extend_cached(&mut order, session_id, &subscription);
            drop(order);

            debug!(
                event = "subscription_added",
                session_id,
                subscription_id,
                destination,
                "subscription registered"
            );
            return Ok(true);
        }
    }

    pub fn remove_subscription(&self, session_id: &str, subscription_id: &str) -> bool {
        let Some(info) = self.session(session_id) else {
            return false;
        };
        let Some(removed) = info.remove(subscription_id) else {
            return false;
        };

        let mut order = self.lock_order();
        order.generation += 1;
        for key in self.affected_keys(&removed.destination) {
            let still_subscribed = !info.matching_ids(&key, self.config.matching).is_empty();
            self.rewrite_entry(&mut order, &key, |subscribers| {
                if still_subscribed {
                    if let Some(ids) = subscribers.get_mut(session_id) {
                        ids.remove(subscription_id);
                    }
                } else {
                    subscribers.remove(session_id);
                }
            });
        }
        self.forget_negative(&mut order, &removed.destination);
        drop(order);

        debug!(
            event = "subscription_removed",
            session_id,
            subscription_id,
            destination = removed.destination.as_str(),
            "subscription removed"
        );
        true
    }

    /// Drops the session and every subscription it held. Returns how many
    /// subscriptions went away.
    pub fn unregister_all_subscriptions(&self, session_id: &str) -> usize {
        let mut order = self.lock_order();
        let Some((_, info)) = self.sessions.remove(session_id) else {
            return 0;
        };
        order.generation += 1;

        let affected: Vec<String> = self
            .access_cache
            .iter()
            .filter(|entry| entry.value().contains_key(session_id))
            .map(|entry| entry.key().clone())
            .collect();
        for key in affected {
            self.rewrite_entry(&mut order, &key, |subscribers| {
                subscribers.remove(session_id);
            });
        }
        drop(order);

        let removed = info.len();
        debug!(
            event = "session_unregistered",
            session_id,
            subscriptions = removed,
            "session subscriptions cleared"
        );
        removed
    }

    /// Resolves who should receive `message` on `destination`.
    pub fn find_subscriptions(&self, destination: &str, message: &Message) -> Arc<SubscriberMap> {
        if self.negative_cache.contains(destination) {
            self.negative_hits.fetch_add(1, Ordering::Relaxed);
            return Arc::new(SubscriberMap::new());
        }

        let cached = self
            .access_cache
            .get(destination)
            .map(|entry| Arc::clone(entry.value()));
        let subscribers = match cached {
            Some(subscribers) => {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                subscribers
            }
            None => self.scan_and_cache(destination),
        };

        if subscribers.is_empty() || !self.selectors_in_use.load(Ordering::Acquire) {
            return subscribers;
        }
        Arc::new(self.filter_by_selector(destination, &subscribers, message))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn subscription_count(&self, session_id: &str) -> usize {
        self.session(session_id).map_or(0, |info| info.len())
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            sessions: self.sessions.len(),
            cached_destinations: self.access_cache.len(),
            negative_destinations: self.negative_cache.len(),
            scans: self.scans.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            negative_hits: self.negative_hits.load(Ordering::Relaxed),
        }
    }

    fn session(&self, session_id: &str) -> Option<Arc<SessionSubscriptionInfo>> {
        self.sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn is_live(&self, session_id: &str, info: &Arc<SessionSubscriptionInfo>) -> bool {
        self.sessions
            .get(session_id)
            .is_some_and(|current| Arc::ptr_eq(current.value(), info))
    }

    fn scan_and_cache(&self, destination: &str) -> Arc<SubscriberMap> {
        let generation = self.lock_order().generation;
        self.scans.fetch_add(1, Ordering::Relaxed);

        let live: Vec<Arc<SessionSubscriptionInfo>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut subscribers = SubscriberMap::new();
        for info in live {
            let ids = info.matching_ids(destination, self.config.matching);
            if !ids.is_empty() {
                subscribers.insert(info.session_id.clone(), ids);
            }
        }
        let subscribers = Arc::new(subscribers);

        if self.config.cache_limit == 0 {
            return subscribers;
        }
        let mut order = self.lock_order();
        if order.generation != generation {
            debug!(
                event = "scan_not_cached",
                destination, "subscriptions changed during scan"
            );
            return subscribers;
        }
        if subscribers.is_empty() {
            self.remember_negative(&mut order, destination);
        } else {
            self.remember_positive(&mut order, destination, Arc::clone(&subscribers));
        }
        subscribers
    }

    fn filter_by_selector(
        &self,
        destination: &str,
        subscribers: &SubscriberMap,
        message: &Message,
    ) -> SubscriberMap {
        let mut filtered = SubscriberMap::new();
        for (session_id, ids) in subscribers {
            let Some(info) = self.session(session_id) else {
                continue;
            };
            let accepted: BTreeSet<String> = ids
                .iter()
                .filter(|id| {
                    let Some(subscription) = info.get(id) else {
                        return false;
                    };
                    let Some(selector) = subscription.selector() else {
                        return true;
                    };
                    match selector.evaluate(message) {
                        Ok(matched) => matched,
                        Err(err) => {
                            warn!(
                                event = "selector_evaluation_failed",
                                session_id = session_id.as_str(),
                                subscription_id = id.as_str(),
                                destination,
                                error = %err,
                                "subscription skipped"
                            );
                            false
                        }
                    }
                })
                .cloned()
                .collect();
            if !accepted.is_empty() {
                filtered.insert(session_id.clone(), accepted);
            }
        }
        filtered
    }

    /// Cached destinations a subscription to `subscribed` would match.
    fn affected_keys(&self, subscribed: &str) -> Vec<String> {
        match self.config.matching {
            DestinationMatching::Exact => self
                .access_cache
                .contains_key(subscribed)
                .then(|| vec![subscribed.to_string()])
                .unwrap_or_default(),
            matching => self
                .access_cache
                .iter()
                .filter(|entry| matching.matches(subscribed, entry.key()))
                .map(|entry| entry.key().clone())
                .collect(),
        }
    }

    fn extend_cached(&self, order: &mut CacheOrder, session_id: &str, subscription: &Subscription) {
        for key in self.affected_keys(&subscription.destination) {
            self.rewrite_entry(order, &key, |subscribers| {
                subscribers
                    .entry(session_id.to_string())
                    .or_default()
                    .insert(subscription.id.clone());
            });
        }

        let matching = self.config.matching;
        let stale: Vec<String> = self
            .negative_cache
            .iter()
            .filter(|entry| matching.matches(&subscription.destination, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        for destination in stale {
            self.forget_negative(order, &destination);
        }
    }

    /// Copy-on-write edit of one cache entry; emptied entries are removed.
    fn rewrite_entry(
        &self,
        order: &mut CacheOrder,
        destination: &str,
        edit: impl FnOnce(&mut SubscriberMap),
    ) {
        let Some(current) = self
            .access_cache
            .get(destination)
            .map(|entry| Arc::clone(entry.value()))
        else {
            return;
        };
        let mut next = (*current).clone();
        edit(&mut next);
        next.retain(|_, ids| !ids.is_empty());

        if next.is_empty() {
            self.access_cache.remove(destination);
            order.positive.retain(|key| key != destination);
        } else {
            self.access_cache
                .insert(destination.to_string(), Arc::new(next));
        }
    }

    fn remember_positive(
        &self,
        order: &mut CacheOrder,
        destination: &str,
        subscribers: Arc<SubscriberMap>,
    ) {
        self.forget_negative(order, destination);
        if self
            .access_cache
            .insert(destination.to_string(), subscribers)
            .is_none()
        {
            order.positive.push_back(destination.to_string());
        }
        while order.positive.len() > self.config.cache_limit {
            let Some(evicted) = order.positive.pop_front() else {
                break;
            };
            self.access_cache.remove(&evicted);
        }
    }

    fn remember_negative(&self, order: &mut CacheOrder, destination: &str) {
        if self.access_cache.remove(destination).is_some() {
            order.positive.retain(|key| key != destination);
        }
        if self.negative_cache.insert(destination.to_string()) {
            order.negative.push_back(destination.to_string());
        }
        while order.negative.len() > self.config.cache_limit {
            let Some(evicted) = order.negative.pop_front() else {
                break;
            };
            self.negative_cache.remove(&evicted);
        }
    }

    fn forget_negative(&self, order: &mut CacheOrder, destination: &str) {
        if self.negative_cache.remove(destination).is_some() {
            order.negative.retain(|key| key != destination);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const TOPOLOGY: &str = "/events/topologies";
    const METADATA: &str = "/events/metadata";

    fn ids(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn lookup_scans_once_then_hits_the_cache() {
        let registry = SubscriptionRegistry::default();
        registry
            .add_subscription("s1", "sub-1", TOPOLOGY, None)
            .expect("add");

        let first = registry.find_subscriptions(TOPOLOGY, &Message::new());
        let second = registry.find_subscriptions(TOPOLOGY, &Message::new());
        assert_eq!(first.get("s1"), Some(&ids(&["sub-1"])));
        assert_eq!(first, second);

        let stats = registry.stats();
        assert_eq!(stats.scans, 1);
        assert_eq!(stats.cache_hits, 1);
    }

    #[test]
    fn negative_cache_answers_without_rescanning() {
        let registry = SubscriptionRegistry::default();
        assert!(registry.find_subscriptions(METADATA, &Message::new()).is_empty());
        assert!(registry.find_subscriptions(METADATA, &Message::new()).is_empty());

        let stats = registry.stats();
        assert_eq!(stats.scans, 1);
        assert_eq!(stats.negative_hits, 1);
        assert_eq!(stats.negative_destinations, 1);
    }

    #[test]
    fn subscribing_clears_the_negative_marker() {
        let registry = SubscriptionRegistry::default();
        assert!(registry.find_subscriptions(METADATA, &Message::new()).is_empty());
        registry
            .add_subscription("s1", "sub-1", METADATA, None)
            .expect("add");

        assert_eq!(registry.stats().negative_destinations, 0);
        let found = registry.find_subscriptions(METADATA, &Message::new());
        assert_eq!(found.get("s1"), Some(&ids(&["sub-1"])));
    }

    #[test]
    fn cached_entries_follow_subscription_changes() {
        let registry = SubscriptionRegistry::default();
        registry
            .add_subscription("s1", "sub-1", TOPOLOGY, None)
            .expect("add");
        registry.find_subscriptions(TOPOLOGY, &Message::new());

        registry
            .add_subscription("s2", "sub-2", TOPOLOGY, None)
            .expect("add");
        registry
            .add_subscription("s1", "sub-3", TOPOLOGY, None)
            .expect("add");
        let found = registry.find_subscriptions(TOPOLOGY, &Message::new());
        assert_eq!(found.get("s1"), Some(&ids(&["sub-1", "sub-3"])));
        assert_eq!(found.get("s2"), Some(&ids(&["sub-2"])));

        assert!(registry.remove_subscription("s1", "sub-1"));
        assert!(registry.remove_subscription("s2", "sub-2"));
        let found = registry.find_subscriptions(TOPOLOGY, &Message::new());
        assert_eq!(found.len(), 1);
        assert_eq!(found.get("s1"), Some(&ids(&["sub-3"])));
        assert_eq!(registry.stats().scans, 1);

        assert!(registry.remove_subscription("s1", "sub-3"));
        assert_eq!(registry.stats().cached_destinations, 0);
        assert!(registry.find_subscriptions(TOPOLOGY, &Message::new()).is_empty());

        let before = registry.stats();
        assert!(registry.find_subscriptions(TOPOLOGY, &Message::new()).is_empty());
        let after = registry.stats();
        assert_eq!(after.scans, before.scans);
        assert_eq!(after.negative_hits, before.negative_hits + 1);
    }

    #[test]
    fn adding_the_same_subscription_twice_is_a_no_op() {
        let registry = SubscriptionRegistry::default();
        assert_eq!(registry.add_subscription("s1", "sub-1", TOPOLOGY, None), Ok(true));
        assert_eq!(registry.add_subscription("s1", "sub-1", METADATA, None), Ok(false));
        assert_eq!(registry.subscription_count("s1"), 1);
        assert!(registry.find_subscriptions(METADATA, &Message::new()).is_empty());
    }

    #[test]
    fn empty_identifiers_are_rejected() {
        let registry = SubscriptionRegistry::default();
        assert_eq!(
            registry.add_subscription("s1", "", TOPOLOGY, None),
            Err(BrokerError::EmptyIdentifier {
                field: "subscription_id"
            })
        );
    }

    #[test]
    fn disconnect_removes_session_from_every_cached_destination() {
        let registry = SubscriptionRegistry::default();
        registry
            .add_subscription("s1", "sub-1", TOPOLOGY, None)
            .expect("add");
        registry
            .add_subscription("s1", "sub-2", METADATA, None)
            .expect("add");
        registry
            .add_subscription("s2", "sub-3", METADATA, None)
            .expect("add");
        registry.find_subscriptions(TOPOLOGY, &Message::new());
        registry.find_subscriptions(METADATA, &Message::new());

        assert_eq!(registry.unregister_all_subscriptions("s1"), 2);
        assert_eq!(registry.session_count(), 1);
        assert!(registry.find_subscriptions(TOPOLOGY, &Message::new()).is_empty());
        let metadata = registry.find_subscriptions(METADATA, &Message::new());
        assert!(!metadata.contains_key("s1"));
        assert!(metadata.contains_key("s2"));
        assert_eq!(registry.unregister_all_subscriptions("s1"), 0);
    }

    #[test]
    fn racing_adds_share_one_session_info() {
        let registry = Arc::new(SubscriptionRegistry::default());
        let handles: Vec<_> = ["sub-a", "sub-b"]
            .into_iter()
            .map(|subscription_id| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    registry
                        .add_subscription("s1", subscription_id, TOPOLOGY, None)
                        .expect("add")
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().expect("join"));
        }

        assert_eq!(registry.session_count(), 1);
        let found = registry.find_subscriptions(TOPOLOGY, &Message::new());
        assert_eq!(found.get("s1"), Some(&ids(&["sub-a", "sub-b"])));
    }

    #[test]
    fn racing_adds_on_different_destinations_keep_both() {
        for _ in 0..200 {
            let registry = Arc::new(SubscriptionRegistry::default());
            let handles: Vec<_> = [("sub-topology", TOPOLOGY), ("sub-metadata", METADATA)]
                .into_iter()
                .map(|(subscription_id, destination)| {
                    let registry = Arc::clone(&registry);
                    thread::spawn(move || {
                        registry
                            .add_subscription("s1", subscription_id, destination, None)
                            .expect("add")
                    })
                })
                .collect();
            for handle in handles {
                assert!(handle.join().expect("join"));
            }

            assert_eq!(registry.session_count(), 1);
            assert_eq!(registry.subscription_count("s1"), 2);
            let topology = registry.find_subscriptions(TOPOLOGY, &Message::new());
            assert_eq!(topology.get("s1"), Some(&ids(&["sub-topology"])));
            let metadata = registry.find_subscriptions(METADATA, &Message::new());
            assert_eq!(metadata.get("s1"), Some(&ids(&["sub-metadata"])));
        }
    }

    #[test]
    fn cache_limit_evicts_oldest_destination() {
        let registry = SubscriptionRegistry::new(RegistryConfig {
            cache_limit: 2,
            ..RegistryConfig::default()
        });
        for destination in ["/a", "/b", "/c"] {
            registry
                .add_subscription("s1", destination, destination, None)
                .expect("add");
            registry.find_subscriptions(destination, &Message::new());
        }

        assert_eq!(registry.stats().cached_destinations, 2);
        registry.find_subscriptions("/a", &Message::new());
        assert_eq!(registry.stats().scans, 4);
    }

    #[test]
    fn malformed_selector_only_excludes_its_own_subscription() {
        let registry = SubscriptionRegistry::default();
        let mut headers = BTreeMap::new();
        headers.insert("selector".to_string(), "headers.event_type ==".to_string());
        let broken = registry.selector_from_headers(&headers);
        assert!(broken.is_some());

        registry
            .add_subscription("s1", "broken", TOPOLOGY, broken)
            .expect("add");
        registry
            .add_subscription(
                "s1",
                "deletes",
                TOPOLOGY,
                Selector::parse("headers.event_type == 'DELETE'").ok(),
            )
            .expect("add");
        registry
            .add_subscription("s2", "plain", TOPOLOGY, None)
            .expect("add");

        let delete = Message::new().with_header("event_type", "DELETE");
        let found = registry.find_subscriptions(TOPOLOGY, &delete);
        assert_eq!(found.get("s1"), Some(&ids(&["deletes"])));
        assert_eq!(found.get("s2"), Some(&ids(&["plain"])));

        let update = Message::new().with_header("event_type", "UPDATE");
        let found = registry.find_subscriptions(TOPOLOGY, &update);
        assert!(!found.contains_key("s1"));
        assert!(found.contains_key("s2"));
    }

    #[test]
    fn pattern_subscriptions_resolve_concrete_destinations() {
        let registry = SubscriptionRegistry::new(RegistryConfig {
            matching: DestinationMatching::Pattern,
            ..RegistryConfig::default()
        });
        registry
            .add_subscription("s1", "all-events", "/events/**", None)
            .expect("add");
        assert!(registry.find_subscriptions("/user/configs", &Message::new()).is_empty());
        registry
            .add_subscription("s2", "user", "/user/*", None)
            .expect("add");

        let found = registry.find_subscriptions(TOPOLOGY, &Message::new());
        assert_eq!(found.get("s1"), Some(&ids(&["all-events"])));
        let found = registry.find_subscriptions("/user/configs", &Message::new());
        assert_eq!(found.get("s2"), Some(&ids(&["user"])));
    }

    #[test]
    fn blank_selector_header_means_no_selector() {
        let registry = SubscriptionRegistry::default();
        let headers = BTreeMap::from([("selector".to_string(), "  ".to_string())]);
        assert!(registry.selector_from_headers(&headers).is_none());
        assert!(registry.selector_from_headers(&BTreeMap::new()).is_none());
    }
}
