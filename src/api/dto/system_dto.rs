//! System DTOs.

use serde::Serialize;
use utoipa::ToSchema;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Always `"healthy"`.
    pub status: String,
    /// RFC 3339 server time.
    pub timestamp: String,
    /// Crate version.
    pub version: String,
}

/// Response body for `GET /ws/info`.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WsInfoResponse {
    /// Connected status subscribers.
    pub status_subscribers: usize,
    /// Active camera stream sessions.
    pub active_streams: usize,
    /// Whether the change dispatcher is subscribed to the machine.
    pub dispatcher_initialized: bool,
}
