//! Camera handlers: list, active streams, single-frame snapshot.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::{SnapshotParams, StreamListResponse};
use crate::app_state::AppState;
use crate::domain::CameraInfo;
use crate::error::{ErrorResponse, GatewayError};

/// `GET /cameras`: every camera, machine cameras first.
#[utoipa::path(
    get,
    path = "/api/v1/cameras",
    tag = "Cameras",
    summary = "List cameras",
    description = "Returns machine-level cameras followed by each head's cameras.",
    responses(
        (status = 200, description = "Camera list", body = Vec<CameraInfo>),
    )
)]
pub async fn list_cameras(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.model.camera_topology().describe())
}

/// `GET /cameras/streams`: active stream sessions.
#[utoipa::path(
    get,
    path = "/api/v1/cameras/streams",
    tag = "Cameras",
    summary = "List active streams",
    description = "Returns the active stream count and the camera each session is streaming.",
    responses(
        (status = 200, description = "Active streams", body = StreamListResponse),
    )
)]
pub async fn list_streams(State(state): State<AppState>) -> impl IntoResponse {
    let streams: std::collections::BTreeMap<String, String> = state
        .streams
        .active_streams()
        .into_iter()
        .map(|(id, camera)| (id.to_string(), camera))
        .collect();
    Json(StreamListResponse {
        active_streams: streams.len(),
        streams,
    })
}

/// `GET /cameras/{id}/snapshot`: one encoded frame.
///
/// # Errors
///
/// Returns [`GatewayError::CameraNotFound`] for unknown cameras, or the
/// machine/encode error if capture or encoding fails.
#[utoipa::path(
    get,
    path = "/api/v1/cameras/{id}/snapshot",
    tag = "Cameras",
    summary = "Capture a snapshot",
    description = "Captures one frame and returns it as an image. Encoding falls back to PNG or a placeholder image when needed.",
    params(
        ("id" = String, Path, description = "Camera id"),
        SnapshotParams,
    ),
    responses(
        (status = 200, description = "Encoded image", body = Vec<u8>, content_type = "image/jpeg"),
        (status = 404, description = "Camera not found", body = ErrorResponse),
        (status = 422, description = "Capture failed", body = ErrorResponse),
    )
)]
pub async fn camera_snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<SnapshotParams>,
) -> Result<impl IntoResponse, GatewayError> {
    if state.model.camera_topology().resolve(&id).is_none() {
        return Err(GatewayError::CameraNotFound(id));
    }

    let quality = params.tier();
    let commands = Arc::clone(&state.commands);
    let encoder = Arc::clone(&state.encoder);
    let encoded = tokio::task::spawn_blocking(move || -> Result<_, GatewayError> {
        let frame = commands.capture(&id)?;
        Ok(encoder.encode(&frame, quality, &id)?)
    })
    .await
    .map_err(|err| GatewayError::Internal(err.to_string()))??;

    Ok((
        [(header::CONTENT_TYPE, encoded.kind.mime_type())],
        encoded.bytes,
    ))
}

/// Camera routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/cameras", get(list_cameras))
        .route("/cameras/streams", get(list_streams))
        .route("/cameras/{id}/snapshot", get(camera_snapshot))
}
