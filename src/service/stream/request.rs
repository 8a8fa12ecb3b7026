//! Normalization of `start_stream` parameters.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Frame rate used when the requested one is absent or out of range.
pub const DEFAULT_FPS: u32 = 10;

/// Highest accepted frame rate.
pub const MAX_FPS: u32 = 30;

/// Compression tier requested by the client.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    /// Smallest frames.
    Low,
    /// Balanced size and fidelity.
    #[default]
    Medium,
    /// Highest fidelity.
    High,
}

impl QualityTier {
    /// JPEG quality (1–100) for this tier: 50, 80, or 95.
    #[must_use]
    pub const fn jpeg_quality(self) -> u8 {
        match self {
            Self::Low => 50,
            Self::Medium => 80,
            Self::High => 95,
        }
    }

    /// Wire name of the tier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Parses a tier name, case-insensitively.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    /// Reads a tier from a raw JSON value, falling back to
    /// [`QualityTier::Medium`] for anything unrecognized.
    #[must_use]
    pub fn from_value(value: Option<&Value>) -> Self {
        value
            .and_then(Value::as_str)
            .and_then(Self::parse)
            .unwrap_or_default()
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reads a frame rate from a raw JSON value.
///
/// Numbers are truncated to whole frames and numeric strings are accepted.
/// Anything outside `(0, 30]` yields [`DEFAULT_FPS`].
#[must_use]
pub fn normalize_fps(value: Option<&Value>) -> u32 {
    let requested = match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().map(|f| f.trunc() as i64),
        _ => None,
    };
    match requested {
        Some(fps) if fps > 0 && fps <= i64::from(MAX_FPS) => fps as u32,
        _ => DEFAULT_FPS,
    }
}

/// A validated request to stream one camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    /// Camera to stream.
    pub camera_id: String,
    /// Frames per second, in `(0, 30]`.
    pub fps: u32,
    /// Compression tier.
    pub quality: QualityTier,
}

impl StreamRequest {
    /// Builds a request with normalized `fps` and `quality`. The camera id
    /// is trimmed but not otherwise checked.
    #[must_use]
    pub fn new(camera_id: &str, fps: Option<&Value>, quality: Option<&Value>) -> Self {
        Self {
            camera_id: camera_id.trim().to_string(),
            fps: normalize_fps(fps),
            quality: QualityTier::from_value(quality),
        }
    }

    /// Interval between capture ticks: `1000 / fps` milliseconds.
    #[must_use]
    pub fn period(&self) -> Duration {
        Duration::from_millis(u64::from(1000 / self.fps.clamp(1, MAX_FPS)))
    }
}
