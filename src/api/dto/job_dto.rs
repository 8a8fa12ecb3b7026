//! Job DTOs.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{JobProgress, JobState};

/// Request body for `POST /job/load`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoadJobRequest {
    /// Path of the job file on the machine host.
    pub file_path: String,
}

/// Response body for `GET /job`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    /// Job name.
    pub name: String,
    /// File the job was loaded from.
    pub file: Option<String>,
    /// Lifecycle state.
    pub state: JobState,
    /// Placements done.
    pub completed_placements: u32,
    /// Placements in the job.
    pub total_placements: u32,
    /// Errors so far.
    pub error_count: u32,
}

impl From<JobProgress> for JobResponse {
    fn from(job: JobProgress) -> Self {
        Self {
            name: job.name,
            file: job.file,
            state: job.state,
            completed_placements: job.completed_steps,
            total_placements: job.total_steps,
            error_count: job.error_count,
        }
    }
}

/// Response body for `GET /job/status`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    /// Lifecycle state.
    pub state: JobState,
    /// Steps done.
    pub completed_steps: u32,
    /// Steps in the job.
    pub total_steps: u32,
    /// Completion in percent, 0 for an empty job.
    pub progress: f64,
}

impl From<&JobProgress> for JobStatusResponse {
    fn from(job: &JobProgress) -> Self {
        let progress = if job.total_steps == 0 {
            0.0
        } else {
            f64::from(job.completed_steps) * 100.0 / f64::from(job.total_steps)
        };
        Self {
            state: job.state,
            completed_steps: job.completed_steps,
            total_steps: job.total_steps,
            progress,
        }
    }
}
