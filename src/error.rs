//! Gateway error types with HTTP status code mapping.
//!
//! [`GatewayError`] is the central error type for the REST surface. Each
//! variant maps to a specific HTTP status code and structured JSON error
//! response. Stream and connection failures have their own narrower types
//! ([`StreamError`], [`SendError`]) because they never reach HTTP directly.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::{CaptureError, MachineError};
use crate::service::stream::EncodeError;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2001,
///     "message": "camera not found: cam9",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                   |
/// |-----------|-----------------|-------------------------------|
/// | 1000–1999 | Validation      | 400 Bad Request               |
/// | 2000–2999 | State/Not Found | 404 Not Found / 409 Conflict  |
/// | 3000–3999 | Server          | 500 / 503                     |
/// | 4000–4999 | Machine         | 422 Unprocessable Entity      |
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Camera with the given id does not exist.
    #[error("camera not found: {0}")]
    CameraNotFound(String),

    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The machine collaborator rejected or failed the operation.
    #[error(transparent)]
    Machine(#[from] MachineError),

    /// Frame encoding failed even for the placeholder.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::CameraNotFound(_) => 2001,
            Self::Machine(MachineError::NotFound { .. }) => 2002,
            Self::Machine(MachineError::NotEnabled) => 2003,
            Self::Machine(MachineError::NoJobLoaded) => 2004,
            Self::Machine(MachineError::NotConfigured) => 3002,
            Self::Machine(_) => 4001,
            Self::Encode(_) => 3003,
            Self::Internal(_) => 3000,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::CameraNotFound(_) | Self::Machine(MachineError::NotFound { .. }) => {
                StatusCode::NOT_FOUND
            }
            Self::Machine(MachineError::NotEnabled | MachineError::NoJobLoaded) => {
                StatusCode::CONFLICT
            }
            Self::Machine(MachineError::NotConfigured) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Machine(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Encode(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

/// Stream failures. The display text is what clients see in `error`
/// messages.
///
/// `MissingCameraId` and `CameraNotFound` are start-time resolution errors
/// (no session is created). The rest are tick-scoped and go through the
/// per-session error throttle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// `cameraId` was absent or empty.
    #[error("Camera ID is required")]
    MissingCameraId,

    /// No camera with that id exists in the current topology.
    #[error("Camera not found: {0}")]
    CameraNotFound(String),

    /// The device failed to capture.
    #[error("Error capturing frame: {0}")]
    Capture(#[from] CaptureError),

    /// The device returned no image.
    #[error("Camera returned no image")]
    NoImage,

    /// The captured image has a zero dimension.
    #[error("Invalid image dimensions: {width}x{height}")]
    InvalidFrame {
        /// Reported width.
        width: u32,
        /// Reported height.
        height: u32,
    },

    /// Every encoding path failed, including the placeholder.
    #[error("Failed to encode frame: {0}")]
    Encode(#[from] EncodeError),

    /// The blocking capture task panicked or was cancelled.
    #[error("Stream tick aborted: {0}")]
    TickAborted(String),

    /// The shared capture worker pool was shut down.
    #[error("Stream worker pool closed")]
    WorkersClosed,

    /// The owning connection is already closed.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Outcome of a failed non-blocking send to one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The outbound queue is full; the message was dropped.
    #[error("outbound queue full")]
    Full,

    /// The connection is closed and will never accept another message.
    #[error("connection closed")]
    Closed,

    /// The payload could not be serialized.
    #[error("serialization failed")]
    Serialize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_not_found_maps_to_404() {
        let err = GatewayError::CameraNotFound("cam9".to_string());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.error_code(), 2001);
        assert_eq!(err.to_string(), "camera not found: cam9");
    }

    #[test]
    fn machine_errors_map_by_kind() {
        let not_enabled = GatewayError::from(MachineError::NotEnabled);
        assert_eq!(not_enabled.status_code(), StatusCode::CONFLICT);
        let no_job = GatewayError::from(MachineError::NoJobLoaded);
        assert_eq!(no_job.status_code(), StatusCode::CONFLICT);
        assert_eq!(no_job.error_code(), 2004);
        let other = GatewayError::from(MachineError::Other("jam".to_string()));
        assert_eq!(other.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(other.to_string(), "machine error: jam");
    }

    #[test]
    fn stream_error_messages_are_client_facing() {
        assert_eq!(StreamError::MissingCameraId.to_string(), "Camera ID is required");
        assert_eq!(
            StreamError::CameraNotFound("cam9".to_string()).to_string(),
            "Camera not found: cam9"
        );
    }

    #[test]
    fn into_response_sets_status() {
        let response = GatewayError::InvalidRequest("bad".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
