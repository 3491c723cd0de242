use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use axum::extract::ws::Message;
use chrono::Utc;
use fleetsync_broker::{Delivery, Transport, TransportError};
use fleetsync_core::wire::{encode_frame, UpdatePayload, WireEnvelope, WireMsg};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

/// Routes broker deliveries onto each session's outbound socket queue.
pub struct ChannelTransport {
    max_frame_bytes: usize,
    sessions: RwLock<HashMap<String, mpsc::Sender<Message>>>,
}

impl ChannelTransport {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn attach(&self, session_id: &str, sender: mpsc::Sender<Message>) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.to_string(), sender);
    }

    pub fn detach(&self, session_id: &str) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
            .is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Transport for ChannelTransport {
    fn send(&self, delivery: Delivery) -> Result<(), TransportError> {
        let sender = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&delivery.session_id)
            .cloned()
            .ok_or_else(|| TransportError::Closed(delivery.session_id.clone()))?;

        let mut envelope = WireEnvelope::new(WireMsg::Update(UpdatePayload {
            destination: delivery.destination,
            subscription_id: delivery.subscription_id,
            event: (*delivery.payload).clone(),
        }));
        envelope.session_id = Some(delivery.session_id.clone());
        envelope.timestamp = Utc::now().to_rfc3339();
        let text = encode_frame(&envelope, self.max_frame_bytes)
            .map_err(|err| TransportError::Encode(err.to_string()))?;

        sender.try_send(Message::Text(text)).map_err(|err| match err {
            TrySendError::Full(_) => TransportError::QueueFull(delivery.session_id.clone()),
            TrySendError::Closed(_) => TransportError::Closed(delivery.session_id.clone()),
        })?;
        debug!(
            event = "update_enqueued",
            session_id = delivery.session_id.as_str(),
            "update queued for session"
        );
        Ok(())
    }
}
