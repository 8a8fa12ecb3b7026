//! Machine command DTOs.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::Location;

/// Request body for `POST /machine/move`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    /// Nozzle or head camera to move.
    pub head_mountable_id: String,
    /// Target X in millimetres.
    pub x: f64,
    /// Target Y in millimetres.
    pub y: f64,
    /// Target Z in millimetres. Defaults to 0.
    #[serde(default)]
    pub z: f64,
    /// Target rotation in degrees. Defaults to 0.
    #[serde(default)]
    pub rotation: f64,
    /// Fraction of maximum feed rate in `(0, 1]`. Defaults to 1.
    #[serde(default = "default_speed")]
    pub speed: f64,
}

fn default_speed() -> f64 {
    1.0
}

impl MoveRequest {
    /// Target location.
    #[must_use]
    pub fn location(&self) -> Location {
        Location {
            x: self.x,
            y: self.y,
            z: self.z,
            rotation: self.rotation,
        }
    }
}

/// Response body for machine commands.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CommandResponse {
    /// Command that was executed.
    pub command: String,
    /// Always `"ok"`; failures use the error body.
    pub status: String,
}

impl CommandResponse {
    /// Successful response for `command`.
    #[must_use]
    pub fn ok(command: &str) -> Self {
        Self {
            command: command.to_string(),
            status: "ok".to_string(),
        }
    }
}
