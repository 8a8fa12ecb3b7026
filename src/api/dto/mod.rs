//! Data Transfer Objects for REST request/response serialization.
//!
//! Field names are camelCase to match the WebSocket messages.

pub mod camera_dto;
pub mod job_dto;
pub mod machine_dto;
pub mod system_dto;

pub use camera_dto::*;
pub use job_dto::*;
pub use machine_dto::*;
pub use system_dto::*;
