//! Stream session manager: one capture loop per connection.
//!
//! Each session runs its own fixed-rate tick task. Capture and encoding are
//! blocking, so every tick moves them onto Tokio's blocking pool behind a
//! shared semaphore that bounds how many run at once. A stalled camera
//! only delays its own session's ticks.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio::time::{Instant, MissedTickBehavior};

use super::encoder::{EncodedImage, FrameEncoder};
use super::request::{QualityTier, StreamRequest};
use super::session::StreamSession;
use crate::domain::{FrameSource, MachineModel, SessionId};
use crate::error::{SendError, StreamError};
use crate::ws::channel::Connection;
use crate::ws::messages::{StreamMessage, now_ms};

/// Tuning for [`StreamSessionManager`].
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    /// Maximum captures/encodes running at once.
    pub workers: usize,
    /// Per-session error report window.
    pub error_throttle: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            error_throttle: Duration::from_secs(5),
        }
    }
}

/// Starts, stops, and tracks stream sessions.
///
/// Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct StreamSessionManager {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    sessions: DashMap<SessionId, Arc<StreamSession>>,
    model: Arc<dyn MachineModel>,
    encoder: Arc<FrameEncoder>,
    workers: Arc<Semaphore>,
    settings: StreamSettings,
}

/// Output of one successful tick.
struct TickOutput {
    message: String,
    placeholder_reason: Option<StreamError>,
}

impl StreamSessionManager {
    /// Creates a manager reading cameras from `model`.
    #[must_use]
    pub fn new(
        model: Arc<dyn MachineModel>,
        encoder: Arc<FrameEncoder>,
        settings: StreamSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: DashMap::new(),
                model,
                encoder,
                workers: Arc::new(Semaphore::new(settings.workers.max(1))),
                settings,
            }),
        }
    }

    /// Starts streaming `request.camera_id` to `connection`, replacing any
    /// session the connection already has. Sends `stream_started` before
    /// the first frame.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::MissingCameraId`] or
    /// [`StreamError::CameraNotFound`] without creating a session, or
    /// [`StreamError::ConnectionClosed`] if the connection is gone.
    pub fn start(
        &self,
        connection: Arc<Connection>,
        request: StreamRequest,
    ) -> Result<Arc<StreamSession>, StreamError> {
        if request.camera_id.is_empty() {
            return Err(StreamError::MissingCameraId);
        }
        if self
            .inner
            .model
            .camera_topology()
            .resolve(&request.camera_id)
            .is_none()
        {
            return Err(StreamError::CameraNotFound(request.camera_id));
        }
        if !connection.is_open() {
            return Err(StreamError::ConnectionClosed);
        }

        let id = connection.id();
        self.stop(id);

        let session = Arc::new(StreamSession::new(
            Arc::clone(&connection),
            &request,
            self.inner.settings.error_throttle,
        ));
        if let Some(previous) = self.inner.sessions.insert(id, Arc::clone(&session)) {
            // a concurrent start for the same connection got in first
            previous.stop();
        }

        let started = StreamMessage::StreamStarted {
            camera_id: request.camera_id.clone(),
            timestamp: now_ms(),
            fps: request.fps,
            quality: request.quality,
        };
        if let Err(SendError::Closed) = connection.send(&started) {
            self.inner.remove_exact(&session);
            session.stop();
            return Err(StreamError::ConnectionClosed);
        }

        let handle = tokio::spawn(run_session(
            Arc::downgrade(&self.inner),
            Arc::clone(&session),
        ));
        session.attach(handle);

        tracing::info!(
            session_id = %id,
            camera_id = %request.camera_id,
            fps = request.fps,
            quality = %request.quality,
            "stream started"
        );
        Ok(session)
    }

    /// Stops the session owned by connection `id`. Idempotent.
    /// Returns `true` if a session was stopped.
    pub fn stop(&self, id: SessionId) -> bool {
        let Some((_, session)) = self.inner.sessions.remove(&id) else {
            return false;
        };
        session.stop();
        tracing::info!(
            session_id = %id,
            camera_id = session.camera_id(),
            frames = session.frames_sent(),
            "stream stopped"
        );
        true
    }

    /// Stops every session. Returns how many were stopped.
    pub fn stop_all(&self) -> usize {
        let ids: Vec<SessionId> = self.inner.sessions.iter().map(|e| *e.key()).collect();
        ids.into_iter().filter(|id| self.stop(*id)).count()
    }

    /// Session id → camera id for every active session.
    #[must_use]
    pub fn active_streams(&self) -> BTreeMap<SessionId, String> {
        self.inner
            .sessions
            .iter()
            .filter(|e| e.value().is_active())
            .map(|e| (*e.key(), e.value().camera_id().to_string()))
            .collect()
    }

    /// Number of active sessions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner
            .sessions
            .iter()
            .filter(|e| e.value().is_active())
            .count()
    }

    /// Number of active sessions streaming `camera_id`.
    #[must_use]
    pub fn active_count_for_camera(&self, camera_id: &str) -> usize {
        self.inner
            .sessions
            .iter()
            .filter(|e| e.value().is_active() && e.value().camera_id() == camera_id)
            .count()
    }

    /// The session owned by connection `id`, if any.
    #[must_use]
    pub fn session(&self, id: SessionId) -> Option<Arc<StreamSession>> {
        self.inner.sessions.get(&id).map(|e| Arc::clone(e.value()))
    }
}

impl Inner {
    /// Removes `session` only if it is still the registered one for its id.
    fn remove_exact(&self, session: &Arc<StreamSession>) -> bool {
        self.sessions
            .remove_if(&session.id(), |_, current| Arc::ptr_eq(current, session))
            .is_some()
    }

    async fn tick(&self, session: &StreamSession) -> Result<TickOutput, StreamError> {
        let source: Arc<dyn FrameSource> = {
            let topology = self.model.camera_topology();
            let camera = topology
                .resolve(session.camera_id())
                .ok_or_else(|| StreamError::CameraNotFound(session.camera_id().to_string()))?;
            Arc::clone(&camera.source)
        };
        let permit = Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .map_err(|_| StreamError::WorkersClosed)?;

        let encoder = Arc::clone(&self.encoder);
        let camera_id = session.camera_id().to_string();
        let quality = session.quality();
        let encoded = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            capture_and_encode(source.as_ref(), &encoder, &camera_id, quality)
        })
        .await
        .map_err(|err| StreamError::TickAborted(err.to_string()))??;

        let placeholder_reason = encoded.failure.clone().map(StreamError::Encode);
        let message = StreamMessage::Frame {
            camera_id: session.camera_id().to_string(),
            timestamp: now_ms(),
            image: BASE64.encode(&encoded.bytes),
            mime_type: encoded.kind.mime_type().to_string(),
            width: encoded.width,
            height: encoded.height,
            fps: session.fps(),
        };
        let message = serde_json::to_string(&message)
            .map_err(|err| StreamError::TickAborted(err.to_string()))?;
        Ok(TickOutput {
            message,
            placeholder_reason,
        })
    }

    /// Logs every failure at debug; reports at most one per throttle window
    /// to the client.
    fn report_error(&self, session: &StreamSession, err: &StreamError) {
        tracing::debug!(
            session_id = %session.id(),
            camera_id = session.camera_id(),
            error = %err,
            "stream tick failed"
        );
        if !session.is_active() || !session.should_report_error(Instant::now()) {
            return;
        }
        tracing::error!(
            session_id = %session.id(),
            camera_id = session.camera_id(),
            suppressed = session.suppressed_errors(),
            error = %err,
            "stream error"
        );
        let message = StreamMessage::error(Some(session.camera_id()), err.to_string());
        if let Err(send_err) = session.connection().send(&message) {
            tracing::debug!(
                session_id = %session.id(),
                error = %send_err,
                "stream error not delivered"
            );
        }
    }

    fn end_for_closed_connection(&self, session: &Arc<StreamSession>) {
        if self.remove_exact(session) {
            tracing::info!(
                session_id = %session.id(),
                camera_id = session.camera_id(),
                "connection closed; stream ended"
            );
        }
        session.stop();
    }
}

/// Blocking half of a tick: capture, validate, encode.
fn capture_and_encode(
    source: &dyn FrameSource,
    encoder: &FrameEncoder,
    camera_id: &str,
    quality: QualityTier,
) -> Result<EncodedImage, StreamError> {
    let frame = source.capture()?.ok_or(StreamError::NoImage)?;
    if frame.validate().is_err() {
        return Err(StreamError::InvalidFrame {
            width: frame.width,
            height: frame.height,
        });
    }
    Ok(encoder.encode(&frame, quality, camera_id)?)
}

/// Fixed-rate loop for one session. Errors never end the loop; only a
/// stop, a closed connection, or a dropped manager do.
async fn run_session(inner: Weak<Inner>, session: Arc<StreamSession>) {
    let mut ticker = tokio::time::interval(session.period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if !session.is_active() {
            break;
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !session.connection().is_open() {
            inner.end_for_closed_connection(&session);
            break;
        }

        match inner.tick(&session).await {
            Ok(output) => match session.deliver_frame(output.message) {
                Ok(true) => {
                    if let Some(reason) = output.placeholder_reason {
                        inner.report_error(&session, &reason);
                    }
                }
                Ok(false) => break,
                Err(_) => {
                    inner.end_for_closed_connection(&session);
                    break;
                }
            },
            Err(err) => inner.report_error(&session, &err),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::SimulatedMachine;
    use crate::ws::channel::Outbox;
    use serde_json::{Value, json};

    fn manager() -> (Arc<SimulatedMachine>, StreamSessionManager) {
        let machine = Arc::new(SimulatedMachine::new(32, 24));
        let manager = StreamSessionManager::new(
            Arc::clone(&machine) as Arc<dyn MachineModel>,
            Arc::new(FrameEncoder::new()),
            StreamSettings {
                workers: 2,
                error_throttle: Duration::from_millis(5000),
            },
        );
        (machine, manager)
    }

    fn request(camera_id: &str, fps: u32) -> StreamRequest {
        StreamRequest::new(camera_id, Some(&json!(fps)), Some(&json!("low")))
    }

    async fn next_json(outbox: &mut Outbox) -> Value {
        let Ok(Some(text)) = tokio::time::timeout(Duration::from_secs(2), outbox.next()).await
        else {
            panic!("expected a message");
        };
        let Ok(value) = serde_json::from_str::<Value>(&text) else {
            panic!("message should be JSON");
        };
        value
    }

    #[tokio::test]
    async fn start_sends_started_then_frames() {
        let (_machine, manager) = manager();
        let (conn, mut outbox) = Connection::channel(SessionId::new(), 16);
        assert!(manager.start(Arc::clone(&conn), request("top", 30)).is_ok());

        let started = next_json(&mut outbox).await;
        assert_eq!(started["type"], "stream_started");
        assert_eq!(started["cameraId"], "top");
        assert_eq!(started["fps"], 30);

        let frame = next_json(&mut outbox).await;
        assert_eq!(frame["type"], "frame");
        assert_eq!(frame["mimeType"], "image/jpeg");
        assert_eq!(frame["width"], 32);
        let Some(image) = frame["image"].as_str() else {
            panic!("frame should carry an image");
        };
        assert!(BASE64.decode(image).is_ok());
        manager.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_follow_requested_rate() {
        let (machine, manager) = manager();
        let Some(camera) = machine.camera("top") else {
            panic!("camera should exist");
        };
        let (conn, _outbox) = Connection::channel(SessionId::new(), 16);
        let Ok(session) = manager.start(Arc::clone(&conn), request("top", 10)) else {
            panic!("start should succeed");
        };

        // first tick is immediate, then one every 100 ms
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(camera.capture_count(), 1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(camera.capture_count(), 3);
        assert_eq!(session.frames_sent(), 3);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(session.frames_sent(), 4);
        manager.stop_all();
    }

    #[tokio::test]
    async fn missing_and_unknown_cameras_are_rejected() {
        let (_machine, manager) = manager();
        let (conn, _outbox) = Connection::channel(SessionId::new(), 16);
        assert!(matches!(
            manager.start(Arc::clone(&conn), request("", 10)),
            Err(StreamError::MissingCameraId)
        ));
        assert_eq!(
            manager.start(Arc::clone(&conn), request("nope", 10)).err(),
            Some(StreamError::CameraNotFound("nope".to_string()))
        );
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn restart_replaces_existing_session() {
        let (_machine, manager) = manager();
        let (conn, _outbox) = Connection::channel(SessionId::new(), 16);
        let Ok(first) = manager.start(Arc::clone(&conn), request("top", 10)) else {
            panic!("first start should succeed");
        };
        let Ok(second) = manager.start(Arc::clone(&conn), request("bottom", 10)) else {
            panic!("second start should succeed");
        };
        assert!(!first.is_active());
        assert!(second.is_active());
        assert_eq!(manager.active_count(), 1);
        assert_eq!(manager.active_count_for_camera("bottom"), 1);
        assert_eq!(manager.active_count_for_camera("top"), 0);
        assert_eq!(
            manager.active_streams().get(&conn.id()).map(String::as_str),
            Some("bottom")
        );
        manager.stop_all();
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_ends_frames() {
        let (_machine, manager) = manager();
        let (conn, mut outbox) = Connection::channel(SessionId::new(), 16);
        let Ok(session) = manager.start(Arc::clone(&conn), request("top", 30)) else {
            panic!("start should succeed");
        };
        let _started = next_json(&mut outbox).await;
        let _frame = next_json(&mut outbox).await;

        assert!(manager.stop(conn.id()));
        assert!(!manager.stop(conn.id()));
        let sent = session.frames_sent();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(session.frames_sent(), sent);
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn capture_failure_is_reported_and_loop_continues() {
        let (machine, manager) = manager();
        let Some(camera) = machine.camera("top") else {
            panic!("camera should exist");
        };
        camera.fail_next(3);
        let (conn, mut outbox) = Connection::channel(SessionId::new(), 16);
        assert!(manager.start(Arc::clone(&conn), request("top", 30)).is_ok());

        let started = next_json(&mut outbox).await;
        assert_eq!(started["type"], "stream_started");
        let error = next_json(&mut outbox).await;
        assert_eq!(error["type"], "error");
        assert_eq!(error["cameraId"], "top");
        // the remaining two failures are throttled; the next tick succeeds
        let frame = next_json(&mut outbox).await;
        assert_eq!(frame["type"], "frame");

        let Some(session) = manager.session(conn.id()) else {
            panic!("session should exist");
        };
        assert_eq!(session.suppressed_errors(), 2);
        manager.stop_all();
    }

    #[tokio::test]
    async fn malformed_frame_streams_placeholder() {
        let (machine, manager) = manager();
        let Some(camera) = machine.camera("top") else {
            panic!("camera should exist");
        };
        camera.malform_next(1);
        let (conn, mut outbox) = Connection::channel(SessionId::new(), 16);
        assert!(manager.start(Arc::clone(&conn), request("top", 30)).is_ok());

        let _started = next_json(&mut outbox).await;
        let (mut saw_error, mut saw_placeholder) = (false, false);
        for _ in 0..6 {
            let message = next_json(&mut outbox).await;
            if message["type"] == "error" {
                saw_error = true;
            } else if message["type"] == "frame" && message["width"] == 160 {
                // placeholder is clamped to the minimum size
                saw_placeholder = true;
            }
            if saw_error && saw_placeholder {
                break;
            }
        }
        assert!(saw_error);
        assert!(saw_placeholder);
        manager.stop_all();
    }

    #[tokio::test]
    async fn closed_connection_ends_session() {
        let (_machine, manager) = manager();
        let (conn, outbox) = Connection::channel(SessionId::new(), 16);
        let Ok(session) = manager.start(Arc::clone(&conn), request("top", 30)) else {
            panic!("start should succeed");
        };
        drop(outbox);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!session.is_active());
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn camera_removed_mid_stream_reports_error() {
        let (machine, manager) = manager();
        let (conn, mut outbox) = Connection::channel(SessionId::new(), 16);
        assert!(manager.start(Arc::clone(&conn), request("top", 30)).is_ok());
        let _started = next_json(&mut outbox).await;
        assert!(machine.remove_camera("top"));

        loop {
            let message = next_json(&mut outbox).await;
            if message["type"] == "error" {
                assert_eq!(message["error"], "Camera not found: top");
                break;
            }
        }
        assert_eq!(manager.active_count(), 1);
        manager.stop_all();
    }
}
