//! System endpoints: health check and WebSocket info.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;

use crate::api::dto::{HealthResponse, WsInfoResponse};
use crate::app_state::AppState;

/// `GET /health`: service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Returns service health status, version, and current timestamp.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// `GET /ws/info`: WebSocket subscriber and stream counts.
#[utoipa::path(
    get,
    path = "/api/v1/ws/info",
    tag = "System",
    summary = "WebSocket info",
    description = "Returns the number of status subscribers and active camera streams.",
    responses(
        (status = 200, description = "Current counts", body = WsInfoResponse),
    )
)]
pub async fn ws_info_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(WsInfoResponse {
        status_subscribers: state.registry.count(),
        active_streams: state.streams.active_count(),
        dispatcher_initialized: state.dispatcher.is_initialized(),
    })
}

/// System routes mounted at the root level (not under /api/v1).
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_handler))
}
