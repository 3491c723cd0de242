use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fleetsync_broker::{AgentSessionManager, SubscriptionRegistry};
use fleetsync_core::wire::{ComponentStatusReport, HeartbeatAck, HeartbeatPayload};
use fleetsync_core::Domain;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::StateError;
use crate::fleet::FleetState;

/// Consumer of component status reports sent by agents.
pub trait ReportSink: Send + Sync {
    fn component_status(&self, host_name: &str, reports: &[ComponentStatusReport]);
}

#[derive(Debug, Clone)]
struct AgentLiveness {
    host_name: String,
    last_ack: HeartbeatAck,
    last_seen: DateTime<Utc>,
}

/// Entry point for everything an agent sends over its session.
pub struct AgentIngress {
    fleet: Arc<FleetState>,
    registry: Arc<SubscriptionRegistry>,
    sessions: Arc<AgentSessionManager>,
    reports: Arc<dyn ReportSink>,
    liveness: DashMap<String, AgentLiveness>,
}

impl AgentIngress {
    pub fn new(
        fleet: Arc<FleetState>,
        registry: Arc<SubscriptionRegistry>,
        sessions: Arc<AgentSessionManager>,
        reports: Arc<dyn ReportSink>,
    ) -> Self {
        Self {
            fleet,
            registry,
            sessions,
            reports,
            liveness: DashMap::new(),
        }
    }

    pub fn fleet(&self) -> &Arc<FleetState> {
        &self.fleet
    }

    /// Binds the session to its host and returns the first heartbeat
    /// response id the agent must send.
    pub fn register_agent(&self, session_id: &str, host_name: &str) -> Result<u64, StateError> {
        for (field, value) in [("session_id", session_id), ("host_name", host_name)] {
            if value.is_empty() {
                return Err(StateError::Broker(
                    fleetsync_broker::BrokerError::EmptyIdentifier { field },
                ));
            }
        }
        if let Some(replaced) = self.sessions.register(host_name, session_id) {
            self.liveness.remove(&replaced);
        }
        let ack = HeartbeatAck {
            response_id: 0,
            restart_agent: false,
        };
        self.liveness.insert(
            session_id.to_string(),
            AgentLiveness {
                host_name: host_name.to_string(),
                last_ack: ack.clone(),
                last_seen: Utc::now(),
            },
        );
        Ok(ack.response_id)
    }

    fn registered_host(&self, session_id: &str) -> Result<String, StateError> {
        self.sessions
            .host_for_session(session_id)
            .ok_or_else(|| StateError::UnregisteredSession(session_id.to_string()))
    }

    /// Answers a hash query with the serialized sync outcome.
    pub fn current_data(
        &self,
        session_id: &str,
        domain: Domain,
        agent_hash: &str,
    ) -> Result<Value, StateError> {
        let host_name = self.registered_host(session_id)?;
        let outcome = self
            .fleet
            .store(domain)
            .sync_value(agent_hash, Some(&host_name));
        if let Err(err) = &outcome {
            warn!(
                event = "current_data_failed",
                session_id,
                host_name = host_name.as_str(),
                domain = domain.as_str(),
                error = %err,
                "hash query failed"
            );
        }
        outcome
    }

    pub fn heartbeat(
        &self,
        session_id: &str,
        heartbeat: &HeartbeatPayload,
    ) -> Result<HeartbeatAck, StateError> {
        let mut liveness = self
            .liveness
            .get_mut(session_id)
            .ok_or_else(|| StateError::UnregisteredSession(session_id.to_string()))?;
        liveness.last_seen = Utc::now();

        let expected = liveness.last_ack.response_id;
        if heartbeat.response_id == expected {
            liveness.last_ack = HeartbeatAck {
                response_id: expected.saturating_add(1),
                restart_agent: false,
            };
            return Ok(liveness.last_ack.clone());
        }
        if heartbeat.response_id.checked_add(1) == Some(expected) {
            debug!(
                event = "heartbeat_repeated",
                session_id,
                response_id = heartbeat.response_id,
                "returning cached acknowledgement"
            );
            return Ok(liveness.last_ack.clone());
        }

        warn!(
            event = "heartbeat_out_of_sequence",
            session_id,
            host_name = liveness.host_name.as_str(),
            expected,
            received = heartbeat.response_id,
            "agent must re-register"
        );
        Ok(HeartbeatAck {
            response_id: expected,
            restart_agent: true,
        })
    }

    pub fn last_seen(&self, session_id: &str) -> Option<DateTime<Utc>> {
        self.liveness.get(session_id).map(|entry| entry.last_seen)
    }

    pub fn component_status(
        &self,
        session_id: &str,
        reports: &[ComponentStatusReport],
    ) -> Result<usize, StateError> {
        let host_name = self.registered_host(session_id)?;
        if !reports.is_empty() {
            self.reports.component_status(&host_name, reports);
        }
        Ok(reports.len())
    }

    pub fn subscribe(
        &self,
        session_id: &str,
        subscription_id: &str,
        destination: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<bool, StateError> {
        let selector = self.registry.selector_from_headers(headers);
        Ok(self
            .registry
            .add_subscription(session_id, subscription_id, destination, selector)?)
    }

    pub fn unsubscribe(&self, session_id: &str, subscription_id: &str) -> bool {
        self.registry.remove_subscription(session_id, subscription_id)
    }

    /// Forgets every subscription and the host binding of the session.
    pub fn disconnect(&self, session_id: &str) -> usize {
        let removed = self.registry.unregister_all_subscriptions(session_id);
        let host_name = self.sessions.unregister_session(session_id);
        self.liveness.remove(session_id);
        info!(
            event = "agent_disconnected",
            session_id,
            host_name = host_name.as_deref().unwrap_or(""),
            subscriptions = removed,
            "agent session closed"
        );
        removed
    }
}
