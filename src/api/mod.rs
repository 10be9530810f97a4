//! HTTP surface: the status endpoint and the websocket push channel.
//!
//! Deliberately small - the dashboard itself is served elsewhere. The
//! websocket handler only bridges the socket to the broadcast hub: outbound
//! frames come from the hub's per-client channel, inbound text frames are
//! push-protocol commands.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::broadcast::BroadcastHub;
use crate::telemetry::StatusProbe;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<BroadcastHub>,
    pub probe: Arc<StatusProbe>,
}

/// Build the station router.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/status", get(get_status))
        .route("/ws", get(ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /api/v1/status - current health snapshot.
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.probe.health_sample())
}

/// GET /ws - upgrade to the push channel.
async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (client_id, mut outbound) = state.hub.register().await;
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                match frame {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text)).await.is_err() {
                            debug!(client_id, "Socket send failed - closing");
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let status = state.probe.health_sample();
                        let reply = state
                            .hub
                            .handle_command(client_id, &text, Some(&status))
                            .await;
                        if ws_tx.send(Message::Text(reply)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ignore binary/ping/pong payloads
                    Some(Err(e)) => {
                        debug!(client_id, error = %e, "Socket receive error");
                        break;
                    }
                }
            }
        }
    }

    state.hub.unregister(client_id).await;
    info!(client_id, "Push channel closed");
}
