//! Axum WebSocket upgrade handlers.

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::IntoResponse;

use super::connection::{run_status_connection, run_stream_connection};
use crate::app_state::AppState;

/// `GET /ws/machine-status`: upgrade to a status-subscriber socket.
pub async fn machine_status_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_status_connection(socket, state))
}

/// `GET /ws/camera-stream`: upgrade to a camera-stream socket.
pub async fn camera_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_stream_connection(socket, state))
}
