//! WebSocket connection loops.
//!
//! Each socket is split into a reader and a writer. The writer drains the
//! connection's [`Outbox`]; the reader dispatches client text. Services
//! never touch the socket directly, they only queue on the [`Connection`].

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};

use super::channel::{Connection, Outbox};
use super::messages::{ClientCommand, StreamMessage, now_ms, parse_command};
use super::status_command::{self, CommandError, StatusCommand};
use crate::app_state::AppState;
use crate::domain::SessionId;
use crate::error::StreamError;
use crate::service::stream::StreamRequest;

/// Reply to an unrecognized status-socket message.
pub const UNKNOWN_COMMAND: &str = "error: unknown command";

/// Runs the read/write loop for a machine-status subscriber.
pub async fn run_status_connection(socket: WebSocket, state: AppState) {
    let (connection, outbox) =
        Connection::channel(SessionId::new(), state.config.connection_buffer);
    let id = connection.id();
    state.registry.join(Arc::clone(&connection));

    pump(socket, &connection, outbox, |text| {
        handle_status_text(text, &connection, &state);
    })
    .await;

    connection.close();
    state.registry.leave(id);
    tracing::info!(session_id = %id, "status connection closed");
}

/// Runs the read/write loop for a camera-stream client.
pub async fn run_stream_connection(socket: WebSocket, state: AppState) {
    let (connection, outbox) =
        Connection::channel(SessionId::new(), state.config.connection_buffer);
    let id = connection.id();
    tracing::info!(session_id = %id, "camera stream connection opened");
    send_or_log(&connection, &cameras_list(&state));

    pump(socket, &connection, outbox, |text| {
        handle_stream_text(text, &connection, &state);
    })
    .await;

    connection.close();
    state.streams.stop(id);
    tracing::info!(session_id = %id, "camera stream connection closed");
}

/// Shared select loop: forwards outbox messages to the socket and hands
/// client text to `on_text` until either side goes away.
async fn pump(
    socket: WebSocket,
    connection: &Connection,
    mut outbox: Outbox,
    mut on_text: impl FnMut(&str),
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => on_text(text.as_str()),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!(
                            session_id = %connection.id(),
                            error = %err,
                            "ws read failed"
                        );
                        break;
                    }
                    _ => {}
                }
            }
            outbound = outbox.next() => {
                let Some(text) = outbound else {
                    break;
                };
                if ws_tx.send(Message::text(text.to_string())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Handles one message on the status socket.
///
/// Machine commands run on the blocking pool; their reply is queued when
/// the machine returns.
pub fn handle_status_text(text: &str, connection: &Arc<Connection>, state: &AppState) {
    let result = match StatusCommand::parse(text) {
        Ok(StatusCommand::Ping) => connection.send_text("pong"),
        Ok(StatusCommand::GetStatus) => state.registry.send_snapshot_to(connection),
        Ok(command) => {
            run_machine_command(command, connection, state);
            return;
        }
        Err(CommandError::Unknown) => {
            tracing::warn!(session_id = %connection.id(), "unknown status command");
            connection.send_text(UNKNOWN_COMMAND)
        }
        Err(err) => connection.send_text(format!("error: {err}")),
    };
    if let Err(err) = result {
        tracing::debug!(
            session_id = %connection.id(),
            error = %err,
            "status reply not delivered"
        );
    }
}

fn run_machine_command(command: StatusCommand, connection: &Arc<Connection>, state: &AppState) {
    let model = Arc::clone(&state.model);
    let commands = Arc::clone(&state.commands);
    let connection = Arc::clone(connection);
    tokio::task::spawn_blocking(move || {
        let reply = status_command::execute(&command, model.as_ref(), commands.as_ref());
        if let Err(err) = connection.send_text(reply) {
            tracing::debug!(
                session_id = %connection.id(),
                command = command.name(),
                error = %err,
                "status reply not delivered"
            );
        }
    });
}

/// Handles one message on the camera-stream socket.
pub fn handle_stream_text(text: &str, connection: &Arc<Connection>, state: &AppState) {
    let command = match parse_command(text) {
        Ok(command) => command,
        Err(err) => {
            tracing::debug!(session_id = %connection.id(), error = %err, "rejected stream command");
            send_or_log(connection, &StreamMessage::error(None, err.to_string()));
            return;
        }
    };

    match command {
        ClientCommand::StartStream {
            camera_id,
            fps,
            quality,
        } => {
            let Some(camera_id) = camera_id else {
                send_or_log(
                    connection,
                    &StreamMessage::error(None, StreamError::MissingCameraId.to_string()),
                );
                return;
            };
            let request = StreamRequest::new(&camera_id, fps.as_ref(), quality.as_ref());
            if let Err(err) = state.streams.start(Arc::clone(connection), request) {
                tracing::warn!(
                    session_id = %connection.id(),
                    camera_id = %camera_id,
                    error = %err,
                    "stream start rejected"
                );
                let camera = (!camera_id.trim().is_empty()).then_some(camera_id.as_str());
                send_or_log(connection, &StreamMessage::error(camera, err.to_string()));
            }
        }
        ClientCommand::StopStream => {
            state.streams.stop(connection.id());
            send_or_log(
                connection,
                &StreamMessage::StreamStopped {
                    timestamp: now_ms(),
                },
            );
        }
        ClientCommand::Ping => send_or_log(
            connection,
            &StreamMessage::Pong {
                timestamp: now_ms(),
            },
        ),
        ClientCommand::GetCameras => send_or_log(connection, &cameras_list(state)),
        ClientCommand::GetStreamInfo => send_or_log(connection, &stream_info(state)),
    }
}

fn cameras_list(state: &AppState) -> StreamMessage {
    StreamMessage::CamerasList {
        timestamp: now_ms(),
        cameras: state.model.camera_topology().describe(),
    }
}

fn stream_info(state: &AppState) -> StreamMessage {
    let streams: BTreeMap<String, String> = state
        .streams
        .active_streams()
        .into_iter()
        .map(|(id, camera)| (id.to_string(), camera))
        .collect();
    StreamMessage::StreamInfo {
        timestamp: now_ms(),
        active_streams: streams.len(),
        streams,
    }
}

fn send_or_log(connection: &Connection, message: &StreamMessage) {
    if let Err(err) = connection.send(message) {
        tracing::debug!(
            session_id = %connection.id(),
            kind = message.kind(),
            error = %err,
            "stream reply not delivered"
        );
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::domain::SimulatedMachine;
    use serde_json::Value;
    use std::time::Duration;

    fn state() -> AppState {
        AppState::new(Arc::new(SimulatedMachine::new(32, 24)), GatewayConfig::default())
    }

    async fn next_text(outbox: &mut Outbox) -> String {
        let Ok(Some(text)) = tokio::time::timeout(Duration::from_secs(2), outbox.next()).await
        else {
            panic!("expected a message");
        };
        text.to_string()
    }

    async fn next_json(outbox: &mut Outbox) -> Value {
        let text = next_text(outbox).await;
        let Ok(value) = serde_json::from_str::<Value>(&text) else {
            panic!("message should be JSON: {text}");
        };
        value
    }

    #[tokio::test]
    async fn status_socket_replies() {
        let state = state();
        let (conn, mut outbox) = Connection::channel(SessionId::new(), 8);

        handle_status_text("ping", &conn, &state);
        assert_eq!(next_text(&mut outbox).await, "pong");

        handle_status_text("getStatus", &conn, &state);
        let status = next_json(&mut outbox).await;
        assert_eq!(status["enabled"], false);
        assert!(status["axes"].is_array());

        handle_status_text("bogus", &conn, &state);
        assert_eq!(next_text(&mut outbox).await, UNKNOWN_COMMAND);
    }

    #[tokio::test]
    async fn status_socket_lists_head_mountables() {
        let state = state();
        let (conn, mut outbox) = Connection::channel(SessionId::new(), 8);
        handle_status_text("getHeadMountables", &conn, &state);
        assert_eq!(
            next_text(&mut outbox).await,
            "headMountables:top:Top Camera:camera;n1:N1:nozzle;n2:N2:nozzle;"
        );
    }

    #[tokio::test]
    async fn status_motion_commands_need_enabled_machine() {
        let state = state();
        let (conn, mut outbox) = Connection::channel(SessionId::new(), 8);
        for command in ["home:all", "move:n1:1:2:3:4", "getPosition:n1", "jog:n1:x:1"] {
            handle_status_text(command, &conn, &state);
            assert_eq!(next_text(&mut outbox).await, "error: machine is not enabled");
        }
    }

    #[tokio::test]
    async fn status_move_jog_and_position() {
        let state = state();
        assert!(state.commands.enable().is_ok());
        let (conn, mut outbox) = Connection::channel(SessionId::new(), 8);

        handle_status_text("move:n1:10:20:NaN:NaN", &conn, &state);
        assert_eq!(next_text(&mut outbox).await, "success: moved N1");
        handle_status_text("jog:N1:x:-2.5", &conn, &state);
        assert_eq!(
            next_text(&mut outbox).await,
            "success: jogged N1 by -2.5 along X"
        );
        handle_status_text("moveAxis:n1:C:90:1", &conn, &state);
        assert_eq!(next_text(&mut outbox).await, "success: moved N1 along Rotation");

        handle_status_text("getPosition:n1", &conn, &state);
        assert_eq!(
            next_text(&mut outbox).await,
            "success: N1 at X=7.5, Y=20, Z=0, Rotation=90"
        );
    }

    #[tokio::test]
    async fn status_home_and_stop() {
        let state = state();
        assert!(state.commands.enable().is_ok());
        let (conn, mut outbox) = Connection::channel(SessionId::new(), 8);

        handle_status_text("home:all", &conn, &state);
        assert_eq!(next_text(&mut outbox).await, "success: machine homed");
        handle_status_text("home:Top Camera", &conn, &state);
        assert_eq!(next_text(&mut outbox).await, "success: Top Camera moved to safe Z");
        handle_status_text("stop:n2", &conn, &state);
        assert_eq!(next_text(&mut outbox).await, "success: N2 stopped");

        handle_status_text("stop:all", &conn, &state);
        assert_eq!(next_text(&mut outbox).await, "success: emergency stop issued");
        let Ok(snapshot) = state.model.snapshot() else {
            panic!("snapshot should succeed");
        };
        assert!(!snapshot.enabled);
    }

    #[tokio::test]
    async fn status_command_errors_are_text() {
        let state = state();
        assert!(state.commands.enable().is_ok());
        let (conn, mut outbox) = Connection::channel(SessionId::new(), 8);

        handle_status_text("move:n1:1", &conn, &state);
        let reply = next_text(&mut outbox).await;
        assert!(reply.starts_with("error: invalid move command, expected move:"));

        handle_status_text("jog:n1:q:1", &conn, &state);
        assert_eq!(next_text(&mut outbox).await, "error: unknown axis: q");

        handle_status_text("move:ghost:1:2:3:4", &conn, &state);
        assert_eq!(
            next_text(&mut outbox).await,
            "error: head mountable not found: ghost"
        );
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn stop_without_session_still_acknowledges() {
        let state = state();
        let (conn, mut outbox) = Connection::channel(SessionId::new(), 8);
        handle_stream_text(r#"{"command":"stop_stream"}"#, &conn, &state);
        let reply = next_json(&mut outbox).await;
        assert_eq!(reply["type"], "stream_stopped");
        assert!(reply["timestamp"].is_i64());
    }

    #[tokio::test]
    async fn get_cameras_lists_machine_and_head_cameras() {
        let state = state();
        let (conn, mut outbox) = Connection::channel(SessionId::new(), 8);
        handle_stream_text(r#"{"command":"get_cameras"}"#, &conn, &state);
        let reply = next_json(&mut outbox).await;
        assert_eq!(reply["type"], "cameras_list");
        let Some(cameras) = reply["cameras"].as_array() else {
            panic!("cameras should be an array");
        };
        let locations: Vec<&str> = cameras
            .iter()
            .filter_map(|c| c["location"].as_str())
            .collect();
        assert_eq!(locations, vec!["machine", "head:H1"]);
    }

    #[tokio::test]
    async fn start_without_camera_is_an_error() {
        let state = state();
        let (conn, mut outbox) = Connection::channel(SessionId::new(), 8);
        handle_stream_text(r#"{"command":"start_stream"}"#, &conn, &state);
        let reply = next_json(&mut outbox).await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["error"], "Camera ID is required");
        assert_eq!(state.streams.active_count(), 0);
    }

    #[tokio::test]
    async fn unknown_camera_is_reported_with_its_id() {
        let state = state();
        let (conn, mut outbox) = Connection::channel(SessionId::new(), 8);
        handle_stream_text(
            r#"{"command":"start_stream","cameraId":"ghost"}"#,
            &conn,
            &state,
        );
        let reply = next_json(&mut outbox).await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["cameraId"], "ghost");
        assert_eq!(reply["error"], "Camera not found: ghost");
    }

    #[tokio::test]
    async fn start_then_stream_info() {
        let state = state();
        let (conn, mut outbox) = Connection::channel(SessionId::new(), 8);
        handle_stream_text(
            r#"{"command":"start_stream","cameraId":"bottom","fps":50,"quality":"ultra"}"#,
            &conn,
            &state,
        );
        let started = next_json(&mut outbox).await;
        assert_eq!(started["type"], "stream_started");
        assert_eq!(started["fps"], 10);
        assert_eq!(started["quality"], "medium");

        handle_stream_text(r#"{"command":"get_stream_info"}"#, &conn, &state);
        let info = loop {
            let message = next_json(&mut outbox).await;
            if message["type"] == "stream_info" {
                break message;
            }
        };
        assert_eq!(info["activeStreams"], 1);
        assert_eq!(info["streams"][conn.id().to_string()], "bottom");
        state.streams.stop_all();
    }

    #[tokio::test]
    async fn malformed_message_keeps_connection_usable() {
        let state = state();
        let (conn, mut outbox) = Connection::channel(SessionId::new(), 8);
        handle_stream_text("{not json", &conn, &state);
        let reply = next_json(&mut outbox).await;
        assert_eq!(reply["type"], "error");
        let Some(error) = reply["error"].as_str() else {
            panic!("error should be a string");
        };
        assert!(error.starts_with("Invalid message format"));

        handle_stream_text("ping", &conn, &state);
        assert_eq!(next_json(&mut outbox).await["type"], "pong");
        assert!(conn.is_open());
    }
}
