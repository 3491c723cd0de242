use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::info;

#[derive(Debug, Default)]
struct Bindings {
    by_host: HashMap<String, String>,
    by_session: HashMap<String, String>,
}

/// Which session currently speaks for which registered host.
#[derive(Debug, Default)]
pub struct AgentSessionManager {
    bindings: RwLock<Bindings>,
}

impl AgentSessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `host_name` to `session_id`. A host that reconnects replaces its
    /// previous session, whose id is returned.
    pub fn register(&self, host_name: &str, session_id: &str) -> Option<String> {
        let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(old_host) = bindings.by_session.remove(session_id) {
            if old_host != host_name {
                bindings.by_host.remove(&old_host);
            }
        }
        let replaced = bindings
            .by_host
            .insert(host_name.to_string(), session_id.to_string())
            .filter(|previous| previous != session_id);
        if let Some(previous) = &replaced {
            bindings.by_session.remove(previous);
        }
        bindings
            .by_session
            .insert(session_id.to_string(), host_name.to_string());
        drop(bindings);

        info!(
            event = "agent_registered",
            host_name,
            session_id,
            replaced_session = replaced.as_deref().unwrap_or(""),
            "agent session bound to host"
        );
        replaced
    }

    /// Returns the host the session was bound to, if any.
    pub fn unregister_session(&self, session_id: &str) -> Option<String> {
        let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        let host_name = bindings.by_session.remove(session_id)?;
        if bindings.by_host.get(&host_name).map(String::as_str) == Some(session_id) {
            bindings.by_host.remove(&host_name);
        }
        Some(host_name)
    }

    pub fn session_for_host(&self, host_name: &str) -> Option<String> {
        let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        bindings.by_host.get(host_name).cloned()
    }

    pub fn host_for_session(&self, session_id: &str) -> Option<String> {
        let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        bindings.by_session.get(session_id).cloned()
    }

    pub fn registered_hosts(&self) -> Vec<String> {
        let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        let mut hosts: Vec<String> = bindings.by_host.keys().cloned().collect();
        hosts.sort();
        hosts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_work_in_both_directions() {
        let sessions = AgentSessionManager::new();
        assert_eq!(sessions.register("h1", "s1"), None);
        assert_eq!(sessions.session_for_host("h1").as_deref(), Some("s1"));
        assert_eq!(sessions.host_for_session("s1").as_deref(), Some("h1"));
    }

    #[test]
    fn reconnecting_host_replaces_its_old_session() {
        let sessions = AgentSessionManager::new();
        sessions.register("h1", "s1");
        assert_eq!(sessions.register("h1", "s2").as_deref(), Some("s1"));
        assert_eq!(sessions.host_for_session("s1"), None);

        // The stale session disconnecting must not unbind the new one.
        assert_eq!(sessions.unregister_session("s1"), None);
        assert_eq!(sessions.session_for_host("h1").as_deref(), Some("s2"));
        assert_eq!(sessions.unregister_session("s2").as_deref(), Some("h1"));
        assert!(sessions.registered_hosts().is_empty());
    }

    #[test]
    fn session_re_registering_as_another_host_drops_the_old_binding() {
        let sessions = AgentSessionManager::new();
        sessions.register("h1", "s1");
        sessions.register("h2", "s1");
        assert_eq!(sessions.session_for_host("h1"), None);
        assert_eq!(sessions.registered_hosts(), vec!["h2".to_string()]);
    }
}
