//! Machine handlers: status read and command forwarding.
//!
//! Commands are forwarded to the machine as-is. Any resulting state change
//! reaches status subscribers through the change dispatcher, not from here.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use super::run_command;
use crate::api::dto::{CommandResponse, MoveRequest};
use crate::app_state::AppState;
use crate::domain::MachineStatus;
use crate::error::{ErrorResponse, GatewayError};

/// `GET /machine/status`: current machine status.
///
/// # Errors
///
/// Returns [`GatewayError::Machine`] if the status cannot be computed.
#[utoipa::path(
    get,
    path = "/api/v1/machine/status",
    tag = "Machine",
    summary = "Machine status",
    description = "Returns the same snapshot pushed to status subscribers.",
    responses(
        (status = 200, description = "Machine status", body = MachineStatus),
        (status = 503, description = "Machine not configured", body = ErrorResponse),
    )
)]
pub async fn machine_status(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, GatewayError> {
    Ok(Json(state.projector.project()?))
}

/// `POST /machine/enable`
///
/// # Errors
///
/// Returns [`GatewayError::Machine`] if the machine refuses.
#[utoipa::path(
    post,
    path = "/api/v1/machine/enable",
    tag = "Machine",
    summary = "Enable the machine",
    responses(
        (status = 200, description = "Machine enabled", body = CommandResponse),
        (status = 422, description = "Machine refused", body = ErrorResponse),
    )
)]
pub async fn enable(State(state): State<AppState>) -> Result<impl IntoResponse, GatewayError> {
    run_command("enable", || state.commands.enable())
}

/// `POST /machine/disable`
///
/// # Errors
///
/// Returns [`GatewayError::Machine`] if the machine refuses.
#[utoipa::path(
    post,
    path = "/api/v1/machine/disable",
    tag = "Machine",
    summary = "Disable the machine",
    responses(
        (status = 200, description = "Machine disabled", body = CommandResponse),
        (status = 422, description = "Machine refused", body = ErrorResponse),
    )
)]
pub async fn disable(State(state): State<AppState>) -> Result<impl IntoResponse, GatewayError> {
    run_command("disable", || state.commands.disable())
}

/// `POST /machine/home`
///
/// # Errors
///
/// Returns [`GatewayError::Machine`]; 409 if the machine is not enabled.
#[utoipa::path(
    post,
    path = "/api/v1/machine/home",
    tag = "Machine",
    summary = "Home all axes",
    responses(
        (status = 200, description = "Machine homed", body = CommandResponse),
        (status = 409, description = "Machine not enabled", body = ErrorResponse),
    )
)]
pub async fn home(State(state): State<AppState>) -> Result<impl IntoResponse, GatewayError> {
    run_command("home", || state.commands.home())
}

/// `POST /machine/emergency-stop`
///
/// # Errors
///
/// Returns [`GatewayError::Machine`] if the stop could not be issued.
#[utoipa::path(
    post,
    path = "/api/v1/machine/emergency-stop",
    tag = "Machine",
    summary = "Emergency stop",
    responses(
        (status = 200, description = "Machine stopped", body = CommandResponse),
    )
)]
pub async fn emergency_stop(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, GatewayError> {
    run_command("emergency_stop", || state.commands.emergency_stop())
}

/// `POST /machine/move`
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] for a speed outside `(0, 1]`,
/// otherwise the machine's error.
#[utoipa::path(
    post,
    path = "/api/v1/machine/move",
    tag = "Machine",
    summary = "Move a nozzle or camera",
    request_body = MoveRequest,
    responses(
        (status = 200, description = "Move completed", body = CommandResponse),
        (status = 400, description = "Invalid speed", body = ErrorResponse),
        (status = 404, description = "Unknown head mountable", body = ErrorResponse),
        (status = 409, description = "Machine not enabled", body = ErrorResponse),
    )
)]
pub async fn move_to(
    State(state): State<AppState>,
    Json(req): Json<MoveRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    if !(req.speed > 0.0 && req.speed <= 1.0) {
        return Err(GatewayError::InvalidRequest(format!(
            "speed must be in (0, 1], got {}",
            req.speed
        )));
    }
    run_command("move", || {
        state
            .commands
            .move_to(&req.head_mountable_id, req.location(), req.speed)
    })
}

/// Machine routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/machine/status", get(machine_status))
        .route("/machine/enable", post(enable))
        .route("/machine/disable", post(disable))
        .route("/machine/home", post(home))
        .route("/machine/emergency-stop", post(emergency_stop))
        .route("/machine/move", post(move_to))
}
