//! One stream session: state machine, task slot, and error throttle.
//!
//! ```text
//! Starting ──attach──► Running ──stop──► Stopping ──► Stopped
//!     └──────────────stop─────────────────┘
//! ```
//!
//! Every transition is a single atomic step. The capture task is attached
//! after spawning; if the session was stopped in between, `attach` aborts
//! the task immediately, so a stopped session never owns a live task.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::request::{QualityTier, StreamRequest};
use crate::domain::SessionId;
use crate::error::SendError;
use crate::ws::channel::Connection;

/// Lifecycle of a [`StreamSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Created, task not yet attached.
    Starting = 0,
    /// Task attached and ticking.
    Running = 1,
    /// Stop in progress.
    Stopping = 2,
    /// Fully stopped. Terminal.
    Stopped = 3,
}

impl SessionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Starting,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Timestamp-gated guard allowing one report per window.
#[derive(Debug, Clone)]
pub struct ErrorThrottle {
    window: Duration,
    last_reported: Option<Instant>,
    suppressed: u64,
}

impl ErrorThrottle {
    /// Creates a throttle with the given window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_reported: None,
            suppressed: 0,
        }
    }

    /// Returns `true` if an error occurring at `now` should be reported.
    /// The first error is always reported.
    pub fn should_report(&mut self, now: Instant) -> bool {
        let allowed = self
            .last_reported
            .is_none_or(|last| now.saturating_duration_since(last) >= self.window);
        if allowed {
            self.last_reported = Some(now);
        } else {
            self.suppressed += 1;
        }
        allowed
    }

    /// Number of errors suppressed so far.
    #[must_use]
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }
}

/// A running capture loop bound to one connection and one camera.
#[derive(Debug)]
pub struct StreamSession {
    id: SessionId,
    camera_id: String,
    fps: u32,
    quality: QualityTier,
    period: Duration,
    started_at: DateTime<Utc>,
    connection: Arc<Connection>,
    state: AtomicU8,
    task: Mutex<Option<JoinHandle<()>>>,
    push_gate: Mutex<()>,
    throttle: Mutex<ErrorThrottle>,
    frames_sent: AtomicU64,
}

impl StreamSession {
    /// Creates a session in [`SessionState::Starting`].
    #[must_use]
    pub fn new(
        connection: Arc<Connection>,
        request: &StreamRequest,
        error_window: Duration,
    ) -> Self {
        Self {
            id: connection.id(),
            camera_id: request.camera_id.clone(),
            fps: request.fps,
            quality: request.quality,
            period: request.period(),
            started_at: Utc::now(),
            connection,
            state: AtomicU8::new(SessionState::Starting as u8),
            task: Mutex::new(None),
            push_gate: Mutex::new(()),
            throttle: Mutex::new(ErrorThrottle::new(error_window)),
            frames_sent: AtomicU64::new(0),
        }
    }

    /// Session id (same as the owning connection's).
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Streamed camera.
    #[must_use]
    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    /// Frames per second.
    #[must_use]
    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Compression tier.
    #[must_use]
    pub fn quality(&self) -> QualityTier {
        self.quality
    }

    /// Tick interval.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wall-clock start time.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Owning connection.
    #[must_use]
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns `true` while starting or running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.state(), SessionState::Starting | SessionState::Running)
    }

    /// Frames handed to the connection so far.
    #[must_use]
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Hands the spawned capture task to the session and moves it to
    /// [`SessionState::Running`]. Aborts the task instead if the session
    /// was stopped first. Returns `true` if the task was attached.
    pub fn attach(&self, handle: JoinHandle<()>) -> bool {
        let mut slot = self.task.lock();
        let attached = self
            .state
            .compare_exchange(
                SessionState::Starting as u8,
                SessionState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if attached {
            *slot = Some(handle);
        } else {
            handle.abort();
        }
        attached
    }

    /// Stops the session: cancels the capture task and waits for any frame
    /// push in progress to finish. No frame is pushed after this returns.
    ///
    /// Idempotent. Returns `true` only for the call that performed the stop.
    pub fn stop(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if matches!(
                SessionState::from_u8(current),
                SessionState::Stopping | SessionState::Stopped
            ) {
                return false;
            }
            match self.state.compare_exchange(
                current,
                SessionState::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        let _gate = self.push_gate.lock();
        self.state.store(SessionState::Stopped as u8, Ordering::Release);
        true
    }

    /// Pushes a frame to the connection unless the session has stopped.
    ///
    /// Returns `Ok(false)` if the session is no longer active.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] if the connection is gone.
    pub fn deliver_frame(&self, text: String) -> Result<bool, SendError> {
        let _gate = self.push_gate.lock();
        if !self.is_active() {
            return Ok(false);
        }
        self.connection.push_frame(text)?;
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// Consults the per-session error throttle.
    pub fn should_report_error(&self, now: Instant) -> bool {
        self.throttle.lock().should_report(now)
    }

    /// Errors suppressed by the throttle so far.
    #[must_use]
    pub fn suppressed_errors(&self) -> u64 {
        self.throttle.lock().suppressed()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn session() -> (StreamSession, crate::ws::channel::Outbox) {
        let (conn, outbox) = Connection::channel(SessionId::new(), 8);
        let request = StreamRequest::new("cam1", None, None);
        (
            StreamSession::new(conn, &request, Duration::from_secs(5)),
            outbox,
        )
    }

    #[test]
    fn throttle_reports_first_then_once_per_window() {
        let mut throttle = ErrorThrottle::new(Duration::from_secs(5));
        let t0 = Instant::now();
        assert!(throttle.should_report(t0));
        assert!(!throttle.should_report(t0 + Duration::from_secs(1)));
        assert!(!throttle.should_report(t0 + Duration::from_millis(4999)));
        assert!(throttle.should_report(t0 + Duration::from_secs(5)));
        assert_eq!(throttle.suppressed(), 2);
    }

    #[tokio::test]
    async fn attach_moves_to_running() {
        let (session, _outbox) = session();
        assert_eq!(session.state(), SessionState::Starting);
        let handle = tokio::spawn(std::future::pending::<()>());
        assert!(session.attach(handle));
        assert_eq!(session.state(), SessionState::Running);
        assert!(session.stop());
        assert_eq!(session.state(), SessionState::Stopped);
    }

    /// Spawns a never-ending task; the receiver resolves once it is dropped.
    fn pending_task() -> (JoinHandle<()>, tokio::sync::oneshot::Receiver<()>) {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        });
        (handle, rx)
    }

    async fn assert_task_dropped(rx: tokio::sync::oneshot::Receiver<()>) {
        let Ok(result) = tokio::time::timeout(Duration::from_secs(1), rx).await else {
            panic!("task was not aborted");
        };
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn attach_after_stop_aborts_task() {
        let (session, _outbox) = session();
        assert!(session.stop());
        let (handle, rx) = pending_task();
        assert!(!session.attach(handle));
        assert_task_dropped(rx).await;
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn stop_aborts_attached_task() {
        let (session, _outbox) = session();
        let (handle, rx) = pending_task();
        assert!(session.attach(handle));
        assert!(session.stop());
        assert_task_dropped(rx).await;
    }

    #[test]
    fn stop_is_idempotent() {
        let (session, _outbox) = session();
        assert!(session.stop());
        assert!(!session.stop());
        assert!(!session.stop());
    }

    #[tokio::test]
    async fn no_frame_after_stop() {
        let (session, mut outbox) = session();
        assert_eq!(session.deliver_frame("f1".to_string()), Ok(true));
        assert_eq!(outbox.next().await.as_deref(), Some("f1"));
        assert!(session.stop());
        assert_eq!(session.deliver_frame("f2".to_string()), Ok(false));
        assert_eq!(session.frames_sent(), 1);
    }

    #[test]
    fn deliver_to_closed_connection_fails() {
        let (session, outbox) = session();
        drop(outbox);
        assert_eq!(
            session.deliver_frame("f".to_string()),
            Err(SendError::Closed)
        );
    }
}
