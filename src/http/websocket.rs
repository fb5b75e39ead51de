//! WebSocket endpoint for downstream clients.
//!
//! # Responsibilities
//! - Enforce the optional connection cap before upgrading
//! - Complete the upgrade handshake
//! - Hand the socket to the connection lifecycle handler
//!
//! # Data Flow
//! ```text
//! Client ──upgrade──→ ws_handler ──socket──→ ConnectionLifecycleHandler::serve
//! Client ←──── text frames (every upstream message, in order) ────
//! ```

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::http::server::AppState;

/// Upgrade a request to a relay connection.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let permit = match &state.connection_limit {
        Some(limit) => match limit.clone().try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                tracing::warn!(
                    clients = state.handler.registry().len(),
                    "Connection limit reached, rejecting client"
                );
                return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
            }
        },
        None => None,
    };

    let handler = state.handler.clone();
    let shutdown = state.shutdown.subscribe();
    ws.on_upgrade(move |socket| async move {
        handler.serve(socket, shutdown).await;
        // Slot is released once the connection is fully torn down
        drop(permit);
    })
}
