//! WebSocket layer: per-connection channels, message codecs, socket loops.
//!
//! Two endpoints share the same transport:
//!
//! - `/ws/machine-status` pushes the full machine status on join and on
//!   every dispatched change, and accepts the text commands in
//!   [`status_command`].
//! - `/ws/camera-stream` accepts stream commands and pushes frames for at
//!   most one camera at a time.

pub mod channel;
pub mod connection;
pub mod handler;
pub mod messages;
pub mod status_command;

use axum::Router;
use axum::routing::get;

use crate::app_state::AppState;

/// WebSocket routes, mounted at the root level.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/ws/machine-status", get(handler::machine_status_handler))
        .route("/ws/camera-stream", get(handler::camera_stream_handler))
}
