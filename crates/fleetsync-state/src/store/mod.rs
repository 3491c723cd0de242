//! Per-domain snapshot caches answering hash queries and absorbing events.

mod cluster;
mod host;
mod merge;

pub use cluster::ClusterScopedStore;
pub use host::HostScopedStore;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fleetsync_broker::UpdatePublisher;
use fleetsync_core::{
    ClusterData, ClusterMap, Domain, Hashed, StateHasher, SyncError, SyncOutcome, UpdateEvent,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::StateError;
use crate::provider::CurrentDataProvider;

/// Receives every event that changed a snapshot, stamped with the new hash.
pub trait UpdateSink<C>: Send + Sync {
    fn publish(&self, domain: Domain, event: &UpdateEvent<C>);
}

impl<C: ClusterData> UpdateSink<C> for UpdatePublisher {
    fn publish(&self, domain: Domain, event: &UpdateEvent<C>) {
        UpdatePublisher::publish(self, domain, event);
    }
}

/// Type-erased view of a store, used where domains are picked at runtime.
pub trait DomainStore: Send + Sync {
    fn domain(&self) -> Domain;

    /// Serialized [`SyncOutcome`] for the agent's hash.
    fn sync_value(&self, agent_hash: &str, host_name: Option<&str>) -> Result<Value, StateError>;

    fn evict_host(&self, _host_name: &str) -> bool {
        false
    }
}

pub(crate) type Snapshot<C> = Option<Hashed<ClusterMap<C>>>;

/// Build, compare and merge logic shared by both store variants. Callers
/// hold the lock of the snapshot they pass in.
pub(crate) struct StoreCore<C> {
    domain: Domain,
    hasher: StateHasher,
    provider: Arc<dyn CurrentDataProvider<C>>,
    sink: Arc<dyn UpdateSink<C>>,
    builds: AtomicU64,
}

impl<C: ClusterData> StoreCore<C> {
    pub(crate) fn new(
        domain: Domain,
        hasher: StateHasher,
        provider: Arc<dyn CurrentDataProvider<C>>,
        sink: Arc<dyn UpdateSink<C>>,
    ) -> Self {
        Self {
            domain,
            hasher,
            provider,
            sink,
            builds: AtomicU64::new(0),
        }
    }

    pub(crate) fn domain(&self) -> Domain {
        self.domain
    }

    pub(crate) fn builds(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    fn hash_error(&self, err: SyncError) -> StateError {
        StateError::HashComputation {
            domain: self.domain,
            reason: err.to_string(),
        }
    }

    pub(crate) fn sync(
        &self,
        snapshot: &mut Snapshot<C>,
        agent_hash: &str,
        host_name: Option<&str>,
    ) -> Result<SyncOutcome<C>, StateError> {
        let current = match snapshot.take() {
            Some(current) => current,
            None => self.build(host_name)?,
        };
        let outcome = if current.matches(agent_hash) {
            SyncOutcome::Unchanged
        } else {
            let mut event = UpdateEvent::create(current.data().clone());
            event.hash = Some(current.hash().to_string());
            event.host_name = host_name.map(str::to_string);
            SyncOutcome::Changed(event)
        };
        *snapshot = Some(current);
        Ok(outcome)
    }

    pub(crate) fn build(&self, host_name: Option<&str>) -> Result<Hashed<ClusterMap<C>>, StateError> {
        let clusters = self.provider.fetch_current(host_name).map_err(|err| {
            warn!(
                event = "snapshot_build_failed",
                domain = self.domain.as_str(),
                host_name = host_name.unwrap_or(""),
                error = %err,
                "current data provider failed"
            );
            StateError::DataUnavailable {
                domain: self.domain,
                scope: scope_label(host_name),
                reason: err.to_string(),
            }
        })?;
        let cluster_count = clusters.len();
        let sealed = Hashed::sealed(clusters, &self.hasher).map_err(|err| self.hash_error(err))?;
        let builds = self.builds.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            event = "snapshot_built",
            domain = self.domain.as_str(),
            host_name = host_name.unwrap_or(""),
            clusters = cluster_count,
            hash = sealed.hash(),
            builds,
            "snapshot built from current data"
        );
        Ok(sealed)
    }

    pub(crate) fn apply(
        &self,
        snapshot: &mut Snapshot<C>,
        event: &UpdateEvent<C>,
    ) -> Result<bool, StateError> {
        let Some(current) = snapshot.as_ref() else {
            debug!(
                event = "update_skipped_unbuilt",
                domain = self.domain.as_str(),
                host_name = event.host_name.as_deref().unwrap_or(""),
                kind = event.kind.as_str(),
                "snapshot not built yet; next sync reads current data"
            );
            return Ok(false);
        };

        let next = match merge::apply_event(self.domain, current.data(), event) {
            Ok(Some(next)) => next,
            Ok(None) => return Ok(false),
            Err(err) => {
                warn!(
                    event = "update_rejected",
                    domain = self.domain.as_str(),
                    host_name = event.host_name.as_deref().unwrap_or(""),
                    error = %err,
                    "inconsistent update"
                );
                return Err(err);
            }
        };
        let sealed = Hashed::sealed(next, &self.hasher).map_err(|err| self.hash_error(err))?;
        let mut outbound = event.clone();
        outbound.hash = Some(sealed.hash().to_string());
        *snapshot = Some(sealed);

        debug!(
            event = "snapshot_updated",
            domain = self.domain.as_str(),
            kind = event.kind.as_str(),
            host_name = event.host_name.as_deref().unwrap_or(""),
            hash = outbound.hash.as_deref().unwrap_or(""),
            "update merged"
        );
        self.sink.publish(self.domain, &outbound);
        Ok(true)
    }
}

fn scope_label(host_name: Option<&str>) -> String {
    match host_name {
        Some(host_name) => format!("host {host_name}"),
        None => "cluster".to_string(),
    }
}

pub(crate) fn outcome_value<C: ClusterData>(
    domain: Domain,
    outcome: &SyncOutcome<C>,
) -> Result<Value, StateError> {
    serde_json::to_value(outcome).map_err(|err| StateError::Encode {
        domain,
        reason: err.to_string(),
    })
}
