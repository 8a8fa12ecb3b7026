//! Job handlers: inspect and drive the loaded job.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use super::run_command;
use crate::api::dto::{CommandResponse, JobResponse, JobStatusResponse, LoadJobRequest};
use crate::app_state::AppState;
use crate::domain::{JobProgress, MachineError};
use crate::error::{ErrorResponse, GatewayError};

fn loaded_job(state: &AppState) -> Result<JobProgress, GatewayError> {
    Ok(state.model.snapshot()?.job.ok_or(MachineError::NoJobLoaded)?)
}

/// `GET /job`: the loaded job.
///
/// # Errors
///
/// Returns 409 if no job is loaded.
#[utoipa::path(
    get,
    path = "/api/v1/job",
    tag = "Job",
    summary = "Loaded job",
    responses(
        (status = 200, description = "Job details", body = JobResponse),
        (status = 409, description = "No job loaded", body = ErrorResponse),
    )
)]
pub async fn job_info(State(state): State<AppState>) -> Result<impl IntoResponse, GatewayError> {
    Ok(Json(JobResponse::from(loaded_job(&state)?)))
}

/// `GET /job/status`: progress of the loaded job.
///
/// # Errors
///
/// Returns 409 if no job is loaded.
#[utoipa::path(
    get,
    path = "/api/v1/job/status",
    tag = "Job",
    summary = "Job progress",
    responses(
        (status = 200, description = "Job progress", body = JobStatusResponse),
        (status = 409, description = "No job loaded", body = ErrorResponse),
    )
)]
pub async fn job_status(State(state): State<AppState>) -> Result<impl IntoResponse, GatewayError> {
    Ok(Json(JobStatusResponse::from(&loaded_job(&state)?)))
}

/// `POST /job/load`
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] for an empty path, otherwise
/// the machine's error.
#[utoipa::path(
    post,
    path = "/api/v1/job/load",
    tag = "Job",
    summary = "Load a job file",
    request_body = LoadJobRequest,
    responses(
        (status = 200, description = "Job loaded", body = CommandResponse),
        (status = 400, description = "Missing file path", body = ErrorResponse),
        (status = 422, description = "Job could not be loaded", body = ErrorResponse),
    )
)]
pub async fn load_job(
    State(state): State<AppState>,
    Json(req): Json<LoadJobRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let path = req.file_path.trim();
    if path.is_empty() {
        return Err(GatewayError::InvalidRequest("filePath is required".to_string()));
    }
    run_command("job_load", || state.commands.load_job(path))
}

/// `POST /job/start`
///
/// # Errors
///
/// Returns 409 if the machine is disabled or no job is loaded.
#[utoipa::path(
    post,
    path = "/api/v1/job/start",
    tag = "Job",
    summary = "Start or resume the job",
    responses(
        (status = 200, description = "Job running", body = CommandResponse),
        (status = 409, description = "Machine not enabled or no job loaded", body = ErrorResponse),
    )
)]
pub async fn start_job(State(state): State<AppState>) -> Result<impl IntoResponse, GatewayError> {
    run_command("job_start", || state.commands.start_job())
}

/// `POST /job/pause`
///
/// # Errors
///
/// Returns 409 if no job is loaded.
#[utoipa::path(
    post,
    path = "/api/v1/job/pause",
    tag = "Job",
    summary = "Pause the job",
    responses(
        (status = 200, description = "Job paused", body = CommandResponse),
        (status = 409, description = "No job loaded", body = ErrorResponse),
    )
)]
pub async fn pause_job(State(state): State<AppState>) -> Result<impl IntoResponse, GatewayError> {
    run_command("job_pause", || state.commands.pause_job())
}

/// `POST /job/stop`
///
/// # Errors
///
/// Returns 409 if no job is loaded.
#[utoipa::path(
    post,
    path = "/api/v1/job/stop",
    tag = "Job",
    summary = "Stop the job",
    responses(
        (status = 200, description = "Job stopped", body = CommandResponse),
        (status = 409, description = "No job loaded", body = ErrorResponse),
    )
)]
pub async fn stop_job(State(state): State<AppState>) -> Result<impl IntoResponse, GatewayError> {
    run_command("job_stop", || state.commands.stop_job())
}

/// Job routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/job", get(job_info))
        .route("/job/status", get(job_status))
        .route("/job/load", post(load_job))
        .route("/job/start", post(start_job))
        .route("/job/pause", post(pause_job))
        .route("/job/stop", post(stop_job))
}
