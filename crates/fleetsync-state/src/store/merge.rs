use fleetsync_core::{ClusterData, ClusterMap, Domain, EventKind, UpdateEvent};

use crate::error::StateError;

/// Applies `event` to a copy of `current`. Returns `None` when nothing
/// changed. Membership is checked for every cluster before anything is
/// merged, so a rejected event never leaves a partial result behind.
pub(crate) fn apply_event<C: ClusterData>(
    domain: Domain,
    current: &ClusterMap<C>,
    event: &UpdateEvent<C>,
) -> Result<Option<ClusterMap<C>>, StateError> {
    for cluster_id in event.clusters.keys() {
        let present = current.contains_key(cluster_id);
        let reason = match (event.kind, present) {
            (EventKind::Create, true) => "cluster already exists",
            (EventKind::Update | EventKind::Delete, false) => "cluster is not present",
            _ => continue,
        };
        return Err(StateError::InconsistentUpdate {
            domain,
            cluster_id: cluster_id.clone(),
            reason: format!("{reason} for {}", event.kind),
        });
    }

    let mut next = current.clone();
    let mut changed = false;
    for (cluster_id, delta) in &event.clusters {
        match event.kind {
            EventKind::Create => {
                next.insert(cluster_id.clone(), delta.clone());
                changed = true;
            }
            EventKind::Update => {
                if let Some(cluster) = next.get_mut(cluster_id) {
                    changed |= cluster.merge_update(delta);
                }
            }
            EventKind::Delete => {
                let Some(cluster) = next.get_mut(cluster_id) else {
                    continue;
                };
                if delta.is_empty() {
                    next.remove(cluster_id);
                    changed = true;
                    continue;
                }
                changed |= cluster.remove_matching(delta);
                if cluster.is_empty() {
                    next.remove(cluster_id);
                }
            }
        }
    }
    Ok(changed.then_some(next))
}
