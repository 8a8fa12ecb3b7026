//! Camera topology: machine-level cameras plus cameras mounted on heads.
//!
//! A [`CameraTopology`] is a point-in-time snapshot. Stream sessions take a
//! fresh one on every tick because cameras can be added or removed while a
//! session is running.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use utoipa::ToSchema;

use super::frame::FrameSource;

/// A camera as seen by the gateway: descriptive metadata plus the capture
/// primitive used to pull frames from it.
#[derive(Clone)]
pub struct CameraHandle {
    /// Camera identifier, unique within the machine.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Driver/implementation type name.
    pub kind: String,
    /// Configured frame width in pixels.
    pub width: u32,
    /// Configured frame height in pixels.
    pub height: u32,
    /// Capture primitive.
    pub source: Arc<dyn FrameSource>,
}

impl fmt::Debug for CameraHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

/// Cameras mounted on one head.
#[derive(Debug, Clone)]
pub struct HeadCameras {
    /// Head identifier.
    pub head_id: String,
    /// Head name, used in the `head:<name>` location label.
    pub head_name: String,
    /// Cameras on this head, in enumeration order.
    pub cameras: Vec<CameraHandle>,
}

/// Snapshot of every camera on the machine.
#[derive(Debug, Clone, Default)]
pub struct CameraTopology {
    /// Machine-level (fixed) cameras, in enumeration order.
    pub machine_cameras: Vec<CameraHandle>,
    /// Heads in enumeration order.
    pub heads: Vec<HeadCameras>,
}

/// Where a camera is mounted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraLocation {
    /// Fixed to the machine frame.
    Machine,
    /// Mounted on the named head.
    Head(String),
}

impl fmt::Display for CameraLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Machine => f.write_str("machine"),
            Self::Head(name) => write!(f, "head:{name}"),
        }
    }
}

/// Serializable camera description returned by `get_cameras` and
/// `GET /api/v1/cameras`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CameraInfo {
    /// Camera identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Driver/implementation type name.
    #[serde(rename = "type")]
    pub kind: String,
    /// Configured width in pixels.
    pub width: u32,
    /// Configured height in pixels.
    pub height: u32,
    /// `machine` or `head:<head name>`.
    pub location: String,
}

impl CameraInfo {
    fn from_handle(handle: &CameraHandle, location: &CameraLocation) -> Self {
        Self {
            id: handle.id.clone(),
            name: handle.name.clone(),
            kind: handle.kind.clone(),
            width: handle.width,
            height: handle.height,
            location: location.to_string(),
        }
    }
}

impl CameraTopology {
    /// Resolves a camera id: machine cameras first, then each head's cameras
    /// in enumeration order. First match wins.
    #[must_use]
    pub fn resolve(&self, camera_id: &str) -> Option<&CameraHandle> {
        self.machine_cameras
            .iter()
            .find(|c| c.id == camera_id)
            .or_else(|| {
                self.heads
                    .iter()
                    .flat_map(|h| h.cameras.iter())
                    .find(|c| c.id == camera_id)
            })
    }

    /// Like [`Self::resolve`], also returning where the camera is mounted.
    #[must_use]
    pub fn locate(&self, camera_id: &str) -> Option<(&CameraHandle, CameraLocation)> {
        if let Some(cam) = self.machine_cameras.iter().find(|c| c.id == camera_id) {
            return Some((cam, CameraLocation::Machine));
        }
        self.heads.iter().find_map(|head| {
            head.cameras
                .iter()
                .find(|c| c.id == camera_id)
                .map(|cam| (cam, CameraLocation::Head(head.head_name.clone())))
        })
    }

    /// Describes every camera, machine cameras first.
    #[must_use]
    pub fn describe(&self) -> Vec<CameraInfo> {
        let machine = self
            .machine_cameras
            .iter()
            .map(|c| CameraInfo::from_handle(c, &CameraLocation::Machine));
        let heads = self.heads.iter().flat_map(|head| {
            let location = CameraLocation::Head(head.head_name.clone());
            head.cameras
                .iter()
                .map(move |c| CameraInfo::from_handle(c, &location))
        });
        machine.chain(heads).collect()
    }

    /// Total number of cameras.
    #[must_use]
    pub fn len(&self) -> usize {
        self.machine_cameras.len() + self.heads.iter().map(|h| h.cameras.len()).sum::<usize>()
    }

    /// Returns `true` if there are no cameras at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
