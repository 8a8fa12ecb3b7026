//! Per-connection outbound channel.
//!
//! Every WebSocket connection gets a [`Connection`] handle, shared by the
//! registry and the stream manager, and an [`Outbox`] owned by the socket
//! writer. Two lanes feed the outbox:
//!
//! - a bounded control queue for status snapshots, replies, and errors.
//!   Sends never wait: a full queue drops the message and counts it.
//! - a single-slot frame lane. Pushing a frame replaces any frame the
//!   writer has not picked up yet, so a slow client sees fewer frames
//!   rather than a growing backlog.
//!
//! The writer always drains control messages before frames.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::sync::mpsc::error::TrySendError;

use crate::domain::SessionId;
use crate::error::SendError;

/// Shared handle to one client connection.
#[derive(Debug)]
pub struct Connection {
    id: SessionId,
    control: mpsc::Sender<Arc<str>>,
    frames: watch::Sender<Option<Arc<str>>>,
    frame_pending: Arc<AtomicBool>,
    open: AtomicBool,
    send_errors: AtomicU64,
    replaced_frames: AtomicU64,
}

/// Receiving side of a [`Connection`], drained by the socket writer.
#[derive(Debug)]
pub struct Outbox {
    control: mpsc::Receiver<Arc<str>>,
    frames: watch::Receiver<Option<Arc<str>>>,
    frame_pending: Arc<AtomicBool>,
}

impl Connection {
    /// Creates a connection handle and its outbox. `capacity` bounds the
    /// control queue (minimum 1).
    #[must_use]
    pub fn channel(id: SessionId, capacity: usize) -> (Arc<Self>, Outbox) {
        let (control_tx, control_rx) = mpsc::channel(capacity.max(1));
        let (frames_tx, frames_rx) = watch::channel(None);
        let frame_pending = Arc::new(AtomicBool::new(false));
        let connection = Arc::new(Self {
            id,
            control: control_tx,
            frames: frames_tx,
            frame_pending: Arc::clone(&frame_pending),
            open: AtomicBool::new(true),
            send_errors: AtomicU64::new(0),
            replaced_frames: AtomicU64::new(0),
        });
        let outbox = Outbox {
            control: control_rx,
            frames: frames_rx,
            frame_pending,
        };
        (connection, outbox)
    }

    /// Stable session identifier.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns `true` until the connection is closed or its writer is gone.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.control.is_closed()
    }

    /// Marks the connection closed. Later sends fail with [`SendError::Closed`].
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Number of control messages that could not be queued.
    #[must_use]
    pub fn send_errors(&self) -> u64 {
        self.send_errors.load(Ordering::Relaxed)
    }

    /// Number of frames overwritten before the writer picked them up.
    #[must_use]
    pub fn replaced_frames(&self) -> u64 {
        self.replaced_frames.load(Ordering::Relaxed)
    }

    /// Queues a pre-serialized text message on the control lane.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Full`] if the queue is full (the message is
    /// dropped) or [`SendError::Closed`] if the connection is gone.
    pub fn send_text(&self, text: impl Into<Arc<str>>) -> Result<(), SendError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(SendError::Closed);
        }
        match self.control.try_send(text.into()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.send_errors.fetch_add(1, Ordering::Relaxed);
                Err(SendError::Full)
            }
            Err(TrySendError::Closed(_)) => {
                self.send_errors.fetch_add(1, Ordering::Relaxed);
                self.close();
                Err(SendError::Closed)
            }
        }
    }

    /// Serializes `message` as JSON and queues it on the control lane.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Serialize`] if serialization fails, otherwise
    /// as [`Self::send_text`].
    pub fn send<T: Serialize>(&self, message: &T) -> Result<(), SendError> {
        let text = serde_json::to_string(message).map_err(|_| SendError::Serialize)?;
        self.send_text(text)
    }

    /// Places a frame in the frame slot, replacing any frame not yet sent.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] if the connection is gone.
    pub fn push_frame(&self, text: impl Into<Arc<str>>) -> Result<(), SendError> {
        if !self.is_open() || self.frames.is_closed() {
            self.close();
            return Err(SendError::Closed);
        }
        if self.frame_pending.swap(true, Ordering::AcqRel) {
            self.replaced_frames.fetch_add(1, Ordering::Relaxed);
        }
        self.frames.send_replace(Some(text.into()));
        Ok(())
    }
}

impl Outbox {
    /// Waits for the next outbound message, control messages first.
    ///
    /// Returns `None` once the [`Connection`] has been dropped.
    pub async fn next(&mut self) -> Option<Arc<str>> {
        loop {
            tokio::select! {
                biased;
                message = self.control.recv() => return message,
                changed = self.frames.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                    self.frame_pending.store(false, Ordering::Release);
                    let frame = self.frames.borrow_and_update().clone();
                    if frame.is_some() {
                        return frame;
                    }
                }
            }
        }
    }
}
