//! Gateway configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Unset or unparsable values fall back
//! to the defaults listed on each field.

use std::net::SocketAddr;
use std::time::Duration;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Top-level gateway configuration.
///
/// Loaded once at startup via [`GatewayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Socket address to bind the HTTP server to. Default `0.0.0.0:8090`.
    pub listen_addr: SocketAddr,

    /// Quiet period before a coalesced status broadcast. Default 50 ms.
    pub status_debounce: Duration,

    /// Maximum number of captures/encodes running at once. Default 4.
    pub stream_workers: usize,

    /// Minimum interval between reported stream errors per session.
    /// Default 5000 ms.
    pub stream_error_throttle: Duration,

    /// Capacity of each connection's outbound control queue. Default 64.
    pub connection_buffer: usize,

    /// Log output format. Default pretty.
    pub log_format: LogFormat,

    /// Frame width of simulated cameras. Default 640.
    pub sim_camera_width: u32,

    /// Frame height of simulated cameras. Default 480.
    pub sim_camera_height: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8090)),
            status_debounce: Duration::from_millis(50),
            stream_workers: 4,
            stream_error_throttle: Duration::from_millis(5000),
            connection_buffer: 64,
            log_format: LogFormat::Pretty,
            sim_camera_width: 640,
            sim_camera_height: 480,
        }
    }
}

impl GatewayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to sensible defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`].
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let listen_addr: SocketAddr = match std::env::var("LISTEN_ADDR") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.listen_addr,
        };

        let status_debounce = Duration::from_millis(parse_env("STATUS_DEBOUNCE_MS", 50));
        let stream_workers = parse_env("STREAM_WORKERS", defaults.stream_workers).max(1);
        let stream_error_throttle =
            Duration::from_millis(parse_env("STREAM_ERROR_THROTTLE_MS", 5000));
        let connection_buffer =
            parse_env("CONNECTION_BUFFER", defaults.connection_buffer).max(1);

        let log_format = if parse_env_bool("LOG_JSON", false)
            || std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"))
        {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        };

        let sim_camera_width = parse_env("SIM_CAMERA_WIDTH", defaults.sim_camera_width).max(1);
        let sim_camera_height = parse_env("SIM_CAMERA_HEIGHT", defaults.sim_camera_height).max(1);

        Ok(Self {
            listen_addr,
            status_debounce,
            stream_workers,
            stream_error_throttle,
            connection_buffer,
            log_format,
            sim_camera_width,
            sim_camera_height,
        })
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().as_deref() {
        Some("true") | Some("TRUE") | Some("1") => true,
        Some("false") | Some("FALSE") | Some("0") => false,
        _ => default,
    }
}
