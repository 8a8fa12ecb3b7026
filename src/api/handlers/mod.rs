//! REST endpoint handlers organized by resource.

pub mod camera;
pub mod job;
pub mod machine;
pub mod system;

use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::CommandResponse;
use crate::app_state::AppState;
use crate::domain::MachineError;
use crate::error::GatewayError;

/// Composes all resource routes under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(camera::routes())
        .merge(machine::routes())
        .merge(job::routes())
        .route("/ws/info", get(system::ws_info_handler))
}

/// Forwards one machine command and logs the outcome.
pub(crate) fn run_command(
    name: &str,
    command: impl FnOnce() -> Result<(), MachineError>,
) -> Result<Json<CommandResponse>, GatewayError> {
    command().map_err(|err| {
        tracing::warn!(command = name, error = %err, "machine command failed");
        GatewayError::from(err)
    })?;
    tracing::info!(command = name, "machine command executed");
    Ok(Json(CommandResponse::ok(name)))
}
