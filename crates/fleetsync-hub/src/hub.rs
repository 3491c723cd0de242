use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use chrono::{DateTime, Utc};
use fleetsync_broker::{AgentSessionManager, RegistryConfig, SubscriptionRegistry, UpdatePublisher};
use fleetsync_core::wire::{
    decode_frame, encode_frame, CurrentDataPayload, ErrorPayload, ProtocolVersion,
    RegisteredPayload, WireEnvelope, WireMsg,
};
use fleetsync_core::StateHasher;
use fleetsync_state::{AgentIngress, FleetProviders, FleetState, ReportSink, StateError};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::transport::ChannelTransport;

pub struct HubState {
    config: Config,
    conn_counter: AtomicU64,
    ingress: AgentIngress,
    transport: Arc<ChannelTransport>,
    shutdown: watch::Receiver<bool>,
}

impl HubState {
    pub fn new(
        config: Config,
        providers: FleetProviders,
        reports: Arc<dyn ReportSink>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new(RegistryConfig {
            cache_limit: config.cache_limit,
            selector_header: config.selector_header.clone(),
            matching: config.destination_matching,
        }));
        let sessions = Arc::new(AgentSessionManager::new());
        let transport = Arc::new(ChannelTransport::new(config.max_frame_bytes));
        let publisher = Arc::new(UpdatePublisher::new(
            Arc::clone(&registry),
            Arc::clone(&sessions),
            transport.clone(),
        ));
        let fleet = Arc::new(FleetState::with_hasher(
            providers,
            publisher,
            StateHasher::new(config.hash_salt.clone()),
        ));
        Self {
            ingress: AgentIngress::new(fleet, registry, sessions, reports),
            config,
            conn_counter: AtomicU64::new(0),
            transport,
            shutdown,
        }
    }

    pub fn fleet(&self) -> &Arc<FleetState> {
        self.ingress.fleet()
    }

    fn next_session_id(&self) -> String {
        let id = self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("agent-{id}")
    }

    /// Decodes one inbound frame and returns the reply, if any.
    pub fn handle_frame(&self, session_id: &str, raw: &str) -> Option<WireEnvelope> {
        let request: WireEnvelope = match decode_frame(raw, self.config.max_frame_bytes) {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "message_invalid", session_id, error = %err);
                return Some(error_envelope(None, "invalid_frame", err.to_string()));
            }
        };
        if request.version != ProtocolVersion::CURRENT {
            return Some(error_envelope(
                Some(&request),
                "unsupported_version",
                format!("protocol version {} is not supported", request.version.0),
            ));
        }
        if let Some(claimed) = request.session_id.as_deref() {
            if claimed != session_id {
                warn!(event = "session_mismatch", session_id, claimed, "rejecting frame");
                return Some(error_envelope(
                    Some(&request),
                    "session_mismatch",
                    format!("frame claims session {claimed}"),
                ));
            }
        }
        if self.config.debug {
            debug!(event = "message_received", session_id, kind = request.msg.kind());
        }

        match self.dispatch(session_id, &request.msg) {
            Ok(Some(msg)) => Some(WireEnvelope::reply_to(&request, msg)),
            Ok(None) => None,
            Err(payload) => Some(WireEnvelope::reply_to(&request, WireMsg::Error(payload))),
        }
    }

    fn dispatch(&self, session_id: &str, msg: &WireMsg) -> Result<Option<WireMsg>, ErrorPayload> {
        match msg {
            WireMsg::Register(payload) => {
                let response_id = self
                    .ingress
                    .register_agent(session_id, &payload.host_name)
                    .map_err(|err| state_error(&err))?;
                info!(
                    event = "agent_registered",
                    session_id,
                    host_name = payload.host_name.as_str()
                );
                Ok(Some(WireMsg::Registered(RegisteredPayload {
                    session_id: session_id.to_string(),
                    response_id,
                })))
            }
            WireMsg::Subscribe(payload) => {
                self.ingress
                    .subscribe(
                        session_id,
                        &payload.subscription_id,
                        &payload.destination,
                        &payload.headers,
                    )
                    .map_err(|err| state_error(&err))?;
                Ok(None)
            }
            WireMsg::Unsubscribe(payload) => {
                self.ingress.unsubscribe(session_id, &payload.subscription_id);
                Ok(None)
            }
            WireMsg::CurrentData(payload) => {
                let outcome = self
                    .ingress
                    .current_data(session_id, payload.domain, &payload.hash)
                    .map_err(|err| state_error(&err))?;
                let hash = outcome["event"]["hash"].as_str().unwrap_or(&payload.hash).to_string();
                Ok(Some(WireMsg::CurrentData(CurrentDataPayload {
                    domain: payload.domain,
                    hash,
                    outcome: Some(outcome),
                })))
            }
            WireMsg::Heartbeat(payload) => self
                .ingress
                .heartbeat(session_id, payload)
                .map(|ack| Some(WireMsg::HeartbeatAck(ack)))
                .map_err(|err| state_error(&err)),
            WireMsg::ComponentStatus(payload) => {
                self.ingress
                    .component_status(session_id, &payload.reports)
                    .map_err(|err| state_error(&err))?;
                Ok(None)
            }
            WireMsg::Registered(_)
            | WireMsg::Update(_)
            | WireMsg::HeartbeatAck(_)
            | WireMsg::Error(_) => Err(ErrorPayload {
                code: "unexpected_message".to_string(),
                message: format!("{} is only sent by the hub", msg.kind()),
            }),
        }
    }

    fn is_stale(&self, session_id: &str, connected_at: DateTime<Utc>) -> bool {
        if self.config.stale_seconds == 0 {
            return false;
        }
        let last_seen = self.ingress.last_seen(session_id).unwrap_or(connected_at);
        let idle = Utc::now().signed_duration_since(last_seen).num_seconds();
        idle > i64::try_from(self.config.stale_seconds).unwrap_or(i64::MAX)
    }

    fn encode(&self, session_id: &str, mut envelope: WireEnvelope) -> Option<Message> {
        envelope.session_id = Some(session_id.to_string());
        envelope.timestamp = Utc::now().to_rfc3339();
        match encode_frame(&envelope, self.config.max_frame_bytes) {
            Ok(text) => Some(Message::Text(text)),
            Err(err) => {
                warn!(event = "reply_encode_failed", session_id, error = %err);
                None
            }
        }
    }

    pub async fn handle_socket(self: Arc<Self>, socket: WebSocket, remote: SocketAddr) {
        let (mut ws_sender, mut ws_receiver) = socket.split();
        let (tx, mut rx) = mpsc::channel::<Message>(self.config.queue_capacity);
        let write_timeout = self.config.write_timeout;
        let write_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match tokio::time::timeout(write_timeout, ws_sender.send(msg)).await {
                    Ok(Ok(())) => {}
                    _ => return,
                }
            }
        });

        let session_id = self.next_session_id();
        let connected_at = Utc::now();
        self.transport.attach(&session_id, tx.clone());
        info!(
            event = "agent_connected",
            session_id = %session_id,
            remote = %remote,
            sessions = self.transport.session_count()
        );

        let mut shutdown = self.shutdown.clone();
        let mut ticker = tokio::time::interval(Duration::from_secs(
            (self.config.stale_seconds / 2).max(1),
        ));
        let reason = loop {
            tokio::select! {
                incoming = ws_receiver.next() => {
                    let msg = match incoming {
                        Some(Ok(value)) => value,
                        Some(Err(err)) => {
                            warn!(event = "read_error", session_id = %session_id, error = %err);
                            break "read_error";
                        }
                        None => break "disconnect",
                    };
                    let text = match msg {
                        Message::Text(text) => text,
                        Message::Binary(bytes) => match String::from_utf8(bytes) {
                            Ok(text) => text,
                            Err(_) => {
                                warn!(event = "message_invalid", session_id = %session_id, error = "binary frame is not utf-8");
                                continue;
                            }
                        },
                        Message::Close(_) => break "client_close",
                        Message::Ping(_) | Message::Pong(_) => continue,
                    };
                    let reply = tokio::task::block_in_place(|| self.handle_frame(&session_id, &text));
                    if let Some(message) = reply.and_then(|envelope| self.encode(&session_id, envelope)) {
                        if tx.send(message).await.is_err() {
                            break "send_error";
                        }
                    }
                }
                _ = ticker.tick() => {
                    if self.is_stale(&session_id, connected_at) {
                        warn!(event = "stale_close", session_id = %session_id);
                        break "stale";
                    }
                }
                _ = shutdown.changed() => break "shutdown",
            }
        };

        let _ = tx
            .send(Message::Close(Some(CloseFrame {
                code: 1000,
                reason: reason.to_string().into(),
            })))
            .await;
        self.transport.detach(&session_id);
        let subscriptions = self.ingress.disconnect(&session_id);
        info!(
            event = "agent_session_closed",
            session_id = %session_id,
            reason,
            subscriptions
        );
        drop(tx);
        let _ = write_task.await;
    }
}

fn error_envelope(request: Option<&WireEnvelope>, code: &str, message: String) -> WireEnvelope {
    let msg = WireMsg::Error(ErrorPayload {
        code: code.to_string(),
        message,
    });
    match request {
        Some(request) => WireEnvelope::reply_to(request, msg),
        None => WireEnvelope::new(msg),
    }
}

fn state_error(err: &StateError) -> ErrorPayload {
    let code = match err {
        StateError::DataUnavailable { .. } => "data_unavailable",
        StateError::InconsistentUpdate { .. } => "inconsistent_update",
        StateError::HashComputation { .. } => "hash_computation",
        StateError::MissingHost { .. } => "missing_host",
        StateError::Encode { .. } => "encode_failed",
        StateError::InvalidEvent { .. } => "invalid_event",
        StateError::UnregisteredSession(_) => "unregistered_session",
        StateError::Broker(_) => "invalid_subscription",
        StateError::HandlersFailed { .. } => "handlers_failed",
    };
    ErrorPayload {
        code: code.to_string(),
        message: err.to_string(),
    }
}
