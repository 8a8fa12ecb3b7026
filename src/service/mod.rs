//! Service layer: status fan-out and camera streaming.
//!
//! [`ChangeDetectionDispatcher`] turns machine change notifications into
//! debounced broadcasts through [`ConnectionRegistry`]. [`stream`] owns the
//! per-connection camera sessions.

pub mod dispatcher;
pub mod registry;
pub mod stream;

pub use dispatcher::{BroadcastSink, ChangeDetectionDispatcher};
pub use registry::{BroadcastReport, ConnectionRegistry};
pub use stream::{StreamSessionManager, StreamSettings};
