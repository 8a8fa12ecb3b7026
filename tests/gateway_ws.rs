//! End-to-end tests against a live server on an ephemeral port.
#![allow(clippy::panic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use pnp_gateway::api;
use pnp_gateway::app_state::AppState;
use pnp_gateway::config::GatewayConfig;
use pnp_gateway::domain::SimulatedMachine;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server() -> (SocketAddr, AppState) {
    let config = GatewayConfig {
        stream_error_throttle: Duration::from_millis(5000),
        ..GatewayConfig::default()
    };
    let state = AppState::new(Arc::new(SimulatedMachine::new(64, 48)), config);
    state.dispatcher.initialize();

    let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
        panic!("bind should succeed");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("listener should have an address");
    };
    let app = api::build_app(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, state)
}

async fn connect(addr: SocketAddr, path: &str) -> Socket {
    let Ok((socket, _)) = connect_async(format!("ws://{addr}{path}")).await else {
        panic!("websocket connect should succeed");
    };
    socket
}

async fn next_text(socket: &mut Socket) -> String {
    loop {
        let Ok(Some(Ok(message))) =
            tokio::time::timeout(Duration::from_secs(3), socket.next()).await
        else {
            panic!("expected a message");
        };
        if let Message::Text(text) = message {
            return text.as_str().to_string();
        }
    }
}

async fn next_json(socket: &mut Socket) -> Value {
    let text = next_text(socket).await;
    let Ok(value) = serde_json::from_str(&text) else {
        panic!("message should be JSON: {text}");
    };
    value
}

async fn next_of_type(socket: &mut Socket, kind: &str) -> Value {
    for _ in 0..50 {
        let message = next_json(socket).await;
        if message["type"] == kind {
            return message;
        }
    }
    panic!("no {kind} message arrived");
}

async fn send_text(socket: &mut Socket, text: &str) {
    if socket.send(Message::text(text)).await.is_err() {
        panic!("send should succeed");
    }
}

#[tokio::test]
async fn health_endpoint_responds() {
    let (addr, _state) = spawn_server().await;
    let Ok(response) = reqwest::get(format!("http://{addr}/health")).await else {
        panic!("request should succeed");
    };
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let Ok(body) = response.json::<Value>().await else {
        panic!("body should be JSON");
    };
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn status_subscriber_gets_snapshot_and_change_broadcast() {
    let (addr, state) = spawn_server().await;
    let mut socket = connect(addr, "/ws/machine-status").await;

    let initial = next_json(&mut socket).await;
    assert_eq!(initial["enabled"], false);
    assert_eq!(state.registry.count(), 1);

    send_text(&mut socket, "ping").await;
    assert_eq!(next_text(&mut socket).await, "pong");

    let client = reqwest::Client::new();
    let Ok(response) = client
        .post(format!("http://{addr}/api/v1/machine/enable"))
        .send()
        .await
    else {
        panic!("enable should succeed");
    };
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let broadcast = next_json(&mut socket).await;
    assert_eq!(broadcast["enabled"], true);

    send_text(&mut socket, "what").await;
    assert_eq!(next_text(&mut socket).await, "error: unknown command");
}

#[tokio::test]
async fn status_subscriber_is_removed_on_close() {
    let (addr, state) = spawn_server().await;
    let mut socket = connect(addr, "/ws/machine-status").await;
    let _initial = next_json(&mut socket).await;
    assert_eq!(state.registry.count(), 1);

    let _ = socket.close(None).await;
    for _ in 0..50 {
        if state.registry.count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(state.registry.count(), 0);
}

#[tokio::test]
async fn camera_stream_round_trip() {
    let (addr, state) = spawn_server().await;
    let mut socket = connect(addr, "/ws/camera-stream").await;

    let cameras = next_json(&mut socket).await;
    assert_eq!(cameras["type"], "cameras_list");
    assert_eq!(cameras["cameras"][0]["id"], "bottom");
    assert_eq!(cameras["cameras"][1]["location"], "head:H1");

    send_text(
        &mut socket,
        r#"{"command":"start_stream","cameraId":"top","fps":20,"quality":"low"}"#,
    )
    .await;
    let started = next_json(&mut socket).await;
    assert_eq!(started["type"], "stream_started");
    assert_eq!(started["cameraId"], "top");
    assert_eq!(started["fps"], 20);

    let frame = next_of_type(&mut socket, "frame").await;
    assert_eq!(frame["cameraId"], "top");
    assert_eq!(frame["width"], 64);
    assert_eq!(frame["height"], 48);
    assert_eq!(state.streams.active_count_for_camera("top"), 1);

    send_text(&mut socket, "stop_stream").await;
    let _stopped = next_of_type(&mut socket, "stream_stopped").await;
    assert_eq!(state.streams.active_count(), 0);

    send_text(&mut socket, r#"{"command":"ping"}"#).await;
    let _pong = next_of_type(&mut socket, "pong").await;
}

#[tokio::test]
async fn closing_stream_socket_stops_session() {
    let (addr, state) = spawn_server().await;
    let mut socket = connect(addr, "/ws/camera-stream").await;
    let _cameras = next_json(&mut socket).await;

    send_text(&mut socket, r#"{"command":"start_stream","cameraId":"bottom"}"#).await;
    let started = next_json(&mut socket).await;
    assert_eq!(started["fps"], 10);
    assert_eq!(started["quality"], "medium");
    assert_eq!(state.streams.active_count(), 1);

    drop(socket);
    for _ in 0..50 {
        if state.streams.active_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(state.streams.active_count(), 0);
}

#[tokio::test]
async fn status_socket_drives_the_machine() {
    let (addr, state) = spawn_server().await;
    let mut socket = connect(addr, "/ws/machine-status").await;
    let _initial = next_json(&mut socket).await;

    send_text(&mut socket, "home:all").await;
    assert_eq!(next_text(&mut socket).await, "error: machine is not enabled");

    assert!(state.commands.enable().is_ok());
    send_text(&mut socket, "move:n1:5:6:NaN:NaN").await;
    // replies and status broadcasts share the socket
    let mut reply = None;
    for _ in 0..50 {
        let text = next_text(&mut socket).await;
        if !text.starts_with('{') {
            reply = Some(text);
            break;
        }
    }
    assert_eq!(reply.as_deref(), Some("success: moved N1"));

    let Ok(snapshot) = state.model.snapshot() else {
        panic!("snapshot should succeed");
    };
    let Some(head) = snapshot.heads.first() else {
        panic!("machine should have a head");
    };
    assert_eq!((head.location.x, head.location.y), (5.0, 6.0));
}
