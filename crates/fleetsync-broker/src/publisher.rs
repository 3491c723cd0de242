use std::sync::Arc;

use fleetsync_core::{ClusterData, Domain, Scope, UpdateEvent};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::message::Message;
use crate::registry::{SubscriberMap, SubscriptionRegistry};
use crate::sessions::AgentSessionManager;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("session {0} is closed")]
    Closed(String),
    #[error("session {0} outbound queue is full")]
    QueueFull(String),
    #[error("delivery encode failed: {0}")]
    Encode(String),
}

/// One payload addressed to one subscription of one session.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub session_id: String,
    pub subscription_id: String,
    pub destination: String,
    pub payload: Arc<Value>,
}

/// Hands deliveries to the connection layer. Implementations must enqueue
/// and return; they are called while per-domain ordering is being held.
pub trait Transport: Send + Sync {
    fn send(&self, delivery: Delivery) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

impl PublishReport {
    pub fn is_empty(&self) -> bool {
        self.delivered == 0 && self.failed == 0
    }
}

pub struct UpdatePublisher {
    registry: Arc<SubscriptionRegistry>,
    sessions: Arc<AgentSessionManager>,
    transport: Arc<dyn Transport>,
}

impl UpdatePublisher {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        sessions: Arc<AgentSessionManager>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            registry,
            sessions,
            transport,
        }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<AgentSessionManager> {
        &self.sessions
    }

    /// Fans a finalized domain event out to its subscribers. Host-scoped
    /// events only reach the session registered for the event's host.
    pub fn publish<C: ClusterData>(&self, domain: Domain, event: &UpdateEvent<C>) -> PublishReport {
        let destination = domain.destination();
        let message = Message::for_event(domain, event);
        let mut subscribers = (*self.registry.find_subscriptions(destination, &message)).clone();

        if domain.scope() == Scope::Host {
            let target = event
                .host_name
                .as_deref()
                .and_then(|host_name| self.sessions.session_for_host(host_name));
            let Some(target) = target else {
                debug!(
                    event = "publish_no_host_session",
                    domain = domain.as_str(),
                    host_name = event.host_name.as_deref().unwrap_or(""),
                    "host-scoped update has no registered session"
                );
                return PublishReport::default();
            };
            subscribers.retain(|session_id, _| *session_id == target);
        }
        if subscribers.is_empty() {
            return PublishReport::default();
        }

        let payload = match serde_json::to_value(event.redacted_for_delete()) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(
                    event = "publish_encode_failed",
                    domain = domain.as_str(),
                    error = %err,
                    "update could not be encoded"
                );
                return PublishReport {
                    delivered: 0,
                    failed: subscribers.values().map(|ids| ids.len()).sum(),
                };
            }
        };
        self.deliver(destination, &subscribers, Arc::new(payload))
    }

    /// Publishes an arbitrary payload on `destination`.
    pub fn publish_to(&self, destination: &str, message: &Message, payload: Value) -> PublishReport {
        let subscribers = self.registry.find_subscriptions(destination, message);
        if subscribers.is_empty() {
            return PublishReport::default();
        }
        self.deliver(destination, &subscribers, Arc::new(payload))
    }

    fn deliver(
        &self,
        destination: &str,
        subscribers: &SubscriberMap,
        payload: Arc<Value>,
    ) -> PublishReport {
        let mut report = PublishReport::default();
        for (session_id, subscription_ids) in subscribers {
            for subscription_id in subscription_ids {
                let delivery = Delivery {
                    session_id: session_id.clone(),
                    subscription_id: subscription_id.clone(),
                    destination: destination.to_string(),
                    payload: Arc::clone(&payload),
                };
                match self.transport.send(delivery) {
                    Ok(()) => report.delivered += 1,
                    Err(err) => {
                        report.failed += 1;
                        warn!(
                            event = "delivery_failed",
                            session_id = session_id.as_str(),
                            subscription_id = subscription_id.as_str(),
                            destination,
                            error = %err,
                            "update not delivered"
                        );
                    }
                }
            }
        }
        debug!(
            event = "update_published",
            destination,
            delivered = report.delivered,
            failed = report.failed,
            "update fan-out complete"
        );
        report
    }
}
