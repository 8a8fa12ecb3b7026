//! Camera-stream socket messages: outbound events and inbound commands.
//!
//! Outbound messages are JSON objects tagged by `type`, with camelCase
//! fields and a millisecond `timestamp`. Inbound messages are JSON objects
//! with a `command` field, or the bare strings `ping` and `stop_stream`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::CameraInfo;
use crate::service::stream::QualityTier;

/// Current time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Server → client message on the camera-stream socket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StreamMessage {
    /// One encoded frame.
    Frame {
        /// Source camera.
        camera_id: String,
        /// Capture time (ms since epoch).
        timestamp: i64,
        /// Base64-encoded image bytes.
        image: String,
        /// MIME type of `image`.
        mime_type: String,
        /// Encoded width in pixels.
        width: u32,
        /// Encoded height in pixels.
        height: u32,
        /// Session frame rate.
        fps: u32,
    },
    /// A failure the client should know about.
    Error {
        /// Camera involved, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        camera_id: Option<String>,
        /// Time of the failure (ms since epoch).
        timestamp: i64,
        /// Human-readable description.
        error: String,
    },
    /// A stream session started.
    StreamStarted {
        /// Streamed camera.
        camera_id: String,
        /// Time (ms since epoch).
        timestamp: i64,
        /// Normalized frame rate.
        fps: u32,
        /// Normalized quality tier.
        quality: QualityTier,
    },
    /// The connection's stream session was stopped.
    StreamStopped {
        /// Time (ms since epoch).
        timestamp: i64,
    },
    /// Every camera on the machine.
    CamerasList {
        /// Time (ms since epoch).
        timestamp: i64,
        /// Camera descriptions, machine cameras first.
        cameras: Vec<CameraInfo>,
    },
    /// Active stream sessions.
    StreamInfo {
        /// Time (ms since epoch).
        timestamp: i64,
        /// Number of active sessions.
        active_streams: usize,
        /// Session id → camera id.
        streams: BTreeMap<String, String>,
    },
    /// Reply to `ping`.
    Pong {
        /// Time (ms since epoch).
        timestamp: i64,
    },
}

impl StreamMessage {
    /// Builds an [`StreamMessage::Error`] stamped now.
    #[must_use]
    pub fn error(camera_id: Option<&str>, error: impl Into<String>) -> Self {
        Self::Error {
            camera_id: camera_id.map(str::to_string),
            timestamp: now_ms(),
            error: error.into(),
        }
    }

    /// Wire name of the message type.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Frame { .. } => "frame",
            Self::Error { .. } => "error",
            Self::StreamStarted { .. } => "stream_started",
            Self::StreamStopped { .. } => "stream_stopped",
            Self::CamerasList { .. } => "cameras_list",
            Self::StreamInfo { .. } => "stream_info",
            Self::Pong { .. } => "pong",
        }
    }
}

/// Client → server command on the camera-stream socket.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    /// Start (or replace) this connection's stream.
    StartStream {
        /// Requested camera; absent or non-string ids become `None`.
        camera_id: Option<String>,
        /// Raw requested frame rate.
        fps: Option<Value>,
        /// Raw requested quality tier.
        quality: Option<Value>,
    },
    /// Stop this connection's stream.
    StopStream,
    /// Liveness check.
    Ping,
    /// List cameras.
    GetCameras,
    /// List active streams.
    GetStreamInfo,
}

/// Why an inbound message was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// Not JSON, or JSON without a string `command` field.
    #[error("Invalid message format: {0}")]
    Malformed(String),

    /// Well-formed, but the command is not recognized.
    #[error("Unknown command: {0}")]
    Unknown(String),
}

#[derive(Debug, Deserialize)]
struct RawCommand {
    command: String,
    #[serde(rename = "cameraId", default)]
    camera_id: Option<Value>,
    #[serde(default)]
    fps: Option<Value>,
    #[serde(default)]
    quality: Option<Value>,
}

/// Parses one inbound text message.
///
/// # Errors
///
/// Returns [`CommandError::Malformed`] for unparsable input and
/// [`CommandError::Unknown`] for unrecognized commands.
pub fn parse_command(text: &str) -> Result<ClientCommand, CommandError> {
    match text.trim() {
        "ping" => return Ok(ClientCommand::Ping),
        "stop_stream" => return Ok(ClientCommand::StopStream),
        _ => {}
    }
    let raw: RawCommand =
        serde_json::from_str(text).map_err(|err| CommandError::Malformed(err.to_string()))?;
    match raw.command.as_str() {
        "start_stream" => Ok(ClientCommand::StartStream {
            camera_id: raw.camera_id.and_then(|v| match v {
                Value::String(s) => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }),
            fps: raw.fps,
            quality: raw.quality,
        }),
        "stop_stream" => Ok(ClientCommand::StopStream),
        "ping" => Ok(ClientCommand::Ping),
        "get_cameras" => Ok(ClientCommand::GetCameras),
        "get_stream_info" => Ok(ClientCommand::GetStreamInfo),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_shortcuts() {
        assert_eq!(parse_command("ping"), Ok(ClientCommand::Ping));
        assert_eq!(parse_command(" stop_stream\n"), Ok(ClientCommand::StopStream));
    }

    #[test]
    fn start_stream_keeps_raw_parameters() {
        let parsed =
            parse_command(r#"{"command":"start_stream","cameraId":"cam1","fps":10,"quality":"low"}"#);
        assert_eq!(
            parsed,
            Ok(ClientCommand::StartStream {
                camera_id: Some("cam1".to_string()),
                fps: Some(json!(10)),
                quality: Some(json!("low")),
            })
        );
    }

    #[test]
    fn start_stream_without_camera() {
        let Ok(ClientCommand::StartStream { camera_id, .. }) =
            parse_command(r#"{"command":"start_stream"}"#)
        else {
            panic!("should parse as start_stream");
        };
        assert!(camera_id.is_none());
    }

    #[test]
    fn json_commands() {
        assert_eq!(parse_command(r#"{"command":"ping"}"#), Ok(ClientCommand::Ping));
        assert_eq!(
            parse_command(r#"{"command":"get_cameras"}"#),
            Ok(ClientCommand::GetCameras)
        );
        assert_eq!(
            parse_command(r#"{"command":"get_stream_info"}"#),
            Ok(ClientCommand::GetStreamInfo)
        );
    }

    #[test]
    fn malformed_and_unknown() {
        assert!(matches!(parse_command("hello"), Err(CommandError::Malformed(_))));
        assert!(matches!(parse_command(r#"{"cmd":"ping"}"#), Err(CommandError::Malformed(_))));
        assert_eq!(
            parse_command(r#"{"command":"dance"}"#),
            Err(CommandError::Unknown("dance".to_string()))
        );
    }

    #[test]
    fn frame_serializes_camel_case_with_type_tag() {
        let msg = StreamMessage::Frame {
            camera_id: "cam1".to_string(),
            timestamp: 1,
            image: "AAAA".to_string(),
            mime_type: "image/jpeg".to_string(),
            width: 4,
            height: 2,
            fps: 10,
        };
        let Ok(value) = serde_json::to_value(&msg) else {
            panic!("frame should serialize");
        };
        assert_eq!(value["type"], "frame");
        assert_eq!(value["cameraId"], "cam1");
        assert_eq!(value["mimeType"], "image/jpeg");
        assert_eq!(msg.kind(), "frame");
    }

    #[test]
    fn error_omits_missing_camera() {
        let Ok(value) = serde_json::to_value(StreamMessage::error(None, "boom")) else {
            panic!("error should serialize");
        };
        assert_eq!(value["type"], "error");
        assert!(value.get("cameraId").is_none());
        assert_eq!(value["error"], "boom");
    }

    #[test]
    fn stream_info_fields() {
        let msg = StreamMessage::StreamInfo {
            timestamp: 5,
            active_streams: 1,
            streams: BTreeMap::from([("s1".to_string(), "cam1".to_string())]),
        };
        let Ok(value) = serde_json::to_value(&msg) else {
            panic!("stream info should serialize");
        };
        assert_eq!(value["activeStreams"], 1);
        assert_eq!(value["streams"]["s1"], "cam1");
        assert_eq!(value["type"], "stream_info");
    }
}
