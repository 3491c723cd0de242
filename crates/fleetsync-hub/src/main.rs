mod config;
mod hub;
mod logging;
mod seed;
mod transport;

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use fleetsync_core::Domain;
use fleetsync_state::{FleetEvent, StateError};
use serde_json::{json, Value};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::load_config;
use crate::hub::HubState;
use crate::seed::{LogReportSink, SeedState};

#[tokio::main]
async fn main() {
    let config = match load_config() {
        Ok(value) => value,
        Err(err) => {
            eprintln!("config_error: {err:#}");
            return;
        }
    };
    let addr: SocketAddr = match config.addr.parse() {
        Ok(value) => value,
        Err(err) => {
            eprintln!("invalid_addr: {} ({err})", config.addr);
            return;
        }
    };
    let log_file = logging::init(&config, addr);

    let seed = match &config.state_file {
        Some(path) => match SeedState::load(path) {
            Ok(value) => value,
            Err(err) => {
                error!(event = "state_file_error", error = %format!("{err:#}"));
                return;
            }
        },
        None => SeedState::default(),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let hub = Arc::new(HubState::new(
        config.clone(),
        seed.into_providers(),
        Arc::new(LogReportSink),
        shutdown_rx,
    ));

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(|| async { "ok" }))
        .route("/events/:domain", post(publish_event))
        .route("/hosts/:host_name/remove", post(remove_host))
        .with_state(hub.clone());

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(value) => value,
        Err(err) => {
            error!(event = "hub_error", error = %err);
            return;
        }
    };

    info!(
        event = "hub_start",
        addr = %config.addr,
        matching = config.destination_matching.as_str(),
        cache_limit = config.cache_limit,
        log_file = %log_file
            .as_deref()
            .map(|path| path.display().to_string())
            .unwrap_or_default()
    );

    let shutdown = async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
    };

    if let Err(err) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    {
        error!(event = "hub_error", error = %err);
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(hub): State<Arc<HubState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        hub.handle_socket(socket, addr).await;
    })
}

/// Admin ingress for controller-side domain events. Loopback only.
async fn publish_event(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(hub): State<Arc<HubState>>,
    Path(domain): Path<String>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    if !addr.ip().is_loopback() {
        return StatusCode::FORBIDDEN.into_response();
    }
    let domain: Domain = match domain.parse() {
        Ok(value) => value,
        Err(err) => {
            return (StatusCode::NOT_FOUND, Json(json!({"error": err.to_string()}))).into_response()
        }
    };
    let published = FleetEvent::from_domain_value(domain, body)
        .and_then(|event| tokio::task::block_in_place(|| hub.fleet().publish(&event)));
    admin_response(published)
}

async fn remove_host(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(hub): State<Arc<HubState>>,
    Path(host_name): Path<String>,
) -> impl IntoResponse {
    if !addr.ip().is_loopback() {
        return StatusCode::FORBIDDEN.into_response();
    }
    admin_response(hub.fleet().on_host_removed(&host_name))
}

fn admin_response(result: Result<usize, StateError>) -> axum::response::Response {
    match result {
        Ok(handlers) => (StatusCode::OK, Json(json!({"handlers": handlers}))).into_response(),
        Err(err) => {
            warn!(event = "admin_event_rejected", error = %err);
            let status = match err {
                StateError::InvalidEvent { .. } => StatusCode::BAD_REQUEST,
                StateError::HandlersFailed { .. } => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(json!({"error": err.to_string()}))).into_response()
        }
    }
}
