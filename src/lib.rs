//! # pnp-gateway
//!
//! Real-time WebSocket gateway for a pick-and-place machine.
//!
//! Two traffic shapes share one process:
//!
//! - **Status**: attribute changes on the live machine model are
//!   deduplicated and coalesced into at most one full-status broadcast per
//!   debounce window, pushed to every `/ws/machine-status` subscriber.
//! - **Camera streams**: each `/ws/camera-stream` connection may run one
//!   capture/encode/push loop at its own frame rate and quality, with
//!   failures contained to that session.
//!
//! The gateway never owns machine state. It reads the machine through the
//! contracts in [`domain`] and forwards commands unchanged.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP, WebSocket)
//!     │
//!     ├── REST Handlers (api/)
//!     ├── WS Handlers (ws/)
//!     │
//!     ├── ConnectionRegistry ◄── ChangeDetectionDispatcher (service/)
//!     ├── StreamSessionManager (service/stream/)
//!     │
//!     └── MachineModel / MachineCommands / ChangeEventSource (domain/)
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod service;
pub mod ws;
