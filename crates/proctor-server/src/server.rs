use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use proctor_core::Identity;
use proctor_relay::{Relay, RelayConfig};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::handlers;
use crate::store::TestStore;
use crate::ws;

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub store: Arc<TestStore>,
    pub heartbeat: Duration,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/tests/run/{identity}", post(handlers::run_tests))
        .route("/tests/download/{task_id}/{filename}", get(handlers::download_test))
        .route("/ws/server/{identity}", get(server_ws_handler))
        .route("/ws/client/{identity}", get(client_ws_handler))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Create and start the server. Returns a handle that keeps it alive.
pub async fn start(config: ServerConfig) -> Result<ServerHandle, std::io::Error> {
    let relay = Arc::new(Relay::new(RelayConfig {
        reply_timeout: Duration::from_secs(config.reply_timeout_secs),
        max_send_queue: config.max_send_queue,
    }));
    let store = Arc::new(TestStore::new(config.media_root.clone()));

    let state = AppState {
        relay: Arc::clone(&relay),
        store,
        heartbeat: Duration::from_secs(config.heartbeat_interval_secs),
    };

    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "relay server started");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        relay,
        _server: server,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    pub relay: Arc<Relay>,
    _server: tokio::task::JoinHandle<()>,
}

/// WebSocket upgrade for a grading agent.
async fn server_ws_handler(
    ws: WebSocketUpgrade,
    Path(identity): Path<Identity>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        ws::handle_server_socket(socket, identity, state.relay, state.heartbeat)
    })
}

/// WebSocket upgrade for a browser.
async fn client_ws_handler(
    ws: WebSocketUpgrade,
    Path(identity): Path<Identity>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        ws::handle_client_socket(socket, identity, state.relay, state.heartbeat)
    })
}
