//! Domain layer: machine contracts, camera topology, frames, and identity.
//!
//! The gateway never owns machine state. Everything here either describes
//! what the external machine model exposes ([`machine`], [`camera`],
//! [`frame`]) or is derived from it ([`status`]). [`simulated`] provides an
//! in-process implementation of those contracts.

pub mod camera;
pub mod frame;
pub mod machine;
pub mod session_id;
pub mod simulated;
pub mod status;

pub use camera::{CameraHandle, CameraInfo, CameraLocation, CameraTopology, HeadCameras};
pub use frame::{CaptureError, Frame, FrameSource, PixelFormat};
pub use machine::{
    AttributeValue, AxisKind, ChangeEventSource, ChangeKey, ChangeListener, ChangeNotification,
    HeadMountable, HeadMountableKind, JobProgress, JobState, ListenerId, Location, MachineCommands,
    MachineError, MachineEvent, MachineModel, MachineSnapshot,
};
pub use session_id::SessionId;
pub use simulated::{SimulatedMachine, SyntheticCamera};
pub use status::{MachineStatus, ModelStatusProjector, StatusProjector};
