//! Machine status snapshot pushed to status subscribers.
//!
//! [`StatusProjector`] turns the live model into the JSON shape that
//! status-socket clients and `GET /api/v1/machine/status` consume. It is a
//! pure read: it never mutates the model.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use utoipa::ToSchema;

use super::machine::{
    AxisState, FeederState, HeadState, JobProgress, JobState, MachineError, MachineModel,
};

/// Full machine status snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// Machine is enabled.
    pub enabled: bool,
    /// Machine is homed.
    pub homed: bool,
    /// Machine is busy.
    pub busy: bool,
    /// Running task description.
    pub current_task: Option<String>,
    /// Motion planner implementation name.
    pub motion_planner_type: Option<String>,
    /// Axis list.
    pub axes: Vec<AxisInfo>,
    /// Head list.
    pub heads: Vec<HeadInfo>,
    /// Feeder list.
    pub feeders: Vec<FeederInfo>,
    /// Current job progress, omitted when no job is loaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<JobInfo>,
}

/// Axis entry of [`MachineStatus`].
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AxisInfo {
    /// Axis identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Axis category (`X`, `Y`, `Z`, `Rotation`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Current coordinate.
    pub position: f64,
    /// Coordinate units.
    pub unit: String,
    /// Whether the axis reports a usable coordinate.
    pub homed: bool,
    /// Coordinate set on homing.
    pub home_coordinate: f64,
}

/// Head entry of [`MachineStatus`].
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HeadInfo {
    /// Head identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Mounted nozzles.
    pub nozzle_ids: Vec<String>,
    /// Mounted cameras.
    pub camera_ids: Vec<String>,
    /// Mounted actuators.
    pub actuator_ids: Vec<String>,
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Z coordinate.
    pub z: f64,
    /// Rotation in degrees.
    pub rotation: f64,
}

/// Feeder entry of [`MachineStatus`].
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeederInfo {
    /// Feeder identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Feeder implementation type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Loaded part.
    pub part_id: Option<String>,
    /// Feeder is enabled.
    pub enabled: bool,
    /// Parts fed so far.
    pub feed_count: u32,
}

/// Job entry of [`MachineStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    /// Job lifecycle state.
    pub state: JobState,
    /// Steps finished so far.
    pub completed_steps: u32,
    /// Total steps.
    pub total_steps: u32,
    /// Errors so far.
    pub error_count: u32,
}

impl From<&AxisState> for AxisInfo {
    fn from(axis: &AxisState) -> Self {
        match axis.coordinate {
            Some(position) => Self {
                id: axis.id.clone(),
                name: axis.name.clone(),
                kind: axis.kind.to_string(),
                position,
                unit: axis.units.clone().unwrap_or_else(|| "mm".to_string()),
                homed: true,
                home_coordinate: axis.home_coordinate,
            },
            None => Self {
                id: axis.id.clone(),
                name: axis.name.clone(),
                kind: axis.kind.to_string(),
                position: 0.0,
                unit: "mm".to_string(),
                homed: false,
                home_coordinate: axis.home_coordinate,
            },
        }
    }
}

impl From<&HeadState> for HeadInfo {
    fn from(head: &HeadState) -> Self {
        Self {
            id: head.id.clone(),
            name: head.name.clone(),
            nozzle_ids: head.nozzle_ids.clone(),
            camera_ids: head.camera_ids.clone(),
            actuator_ids: head.actuator_ids.clone(),
            x: head.location.x,
            y: head.location.y,
            z: head.location.z,
            rotation: head.location.rotation,
        }
    }
}

impl From<&FeederState> for FeederInfo {
    fn from(feeder: &FeederState) -> Self {
        Self {
            id: feeder.id.clone(),
            name: feeder.name.clone(),
            kind: feeder.kind.clone(),
            part_id: feeder.part_id.clone(),
            enabled: feeder.enabled,
            feed_count: feeder.feed_count,
        }
    }
}

impl From<&JobProgress> for JobInfo {
    fn from(job: &JobProgress) -> Self {
        Self {
            state: job.state,
            completed_steps: job.completed_steps,
            total_steps: job.total_steps,
            error_count: job.error_count,
        }
    }
}

/// Assembles a [`MachineStatus`] from the live model.
pub trait StatusProjector: Send + Sync + fmt::Debug {
    /// Builds one snapshot.
    ///
    /// # Errors
    ///
    /// Returns a [`MachineError`] if the model cannot be read.
    fn project(&self) -> Result<MachineStatus, MachineError>;
}

/// [`StatusProjector`] backed by a [`MachineModel`].
#[derive(Debug, Clone)]
pub struct ModelStatusProjector {
    model: Arc<dyn MachineModel>,
}

impl ModelStatusProjector {
    /// Creates a projector reading from `model`.
    #[must_use]
    pub fn new(model: Arc<dyn MachineModel>) -> Self {
        Self { model }
    }
}

impl StatusProjector for ModelStatusProjector {
    fn project(&self) -> Result<MachineStatus, MachineError> {
        let snapshot = self.model.snapshot()?;
        Ok(MachineStatus {
            enabled: snapshot.enabled,
            homed: snapshot.homed,
            busy: snapshot.busy,
            current_task: snapshot.current_task,
            motion_planner_type: snapshot.motion_planner,
            axes: snapshot.axes.iter().map(AxisInfo::from).collect(),
            heads: snapshot.heads.iter().map(HeadInfo::from).collect(),
            feeders: snapshot.feeders.iter().map(FeederInfo::from).collect(),
            job: snapshot.job.as_ref().map(JobInfo::from),
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::camera::CameraTopology;
    use crate::domain::machine::{AxisKind, HeadMountable, Location, MachineSnapshot};

    #[derive(Debug)]
    struct FixedModel(Result<MachineSnapshot, MachineError>);

    impl MachineModel for FixedModel {
        fn snapshot(&self) -> Result<MachineSnapshot, MachineError> {
            self.0.clone()
        }

        fn camera_topology(&self) -> CameraTopology {
            CameraTopology::default()
        }

        fn head_mountables(&self) -> Vec<HeadMountable> {
            Vec::new()
        }

        fn location_of(&self, head_mountable_id: &str) -> Result<Location, MachineError> {
            Err(MachineError::NotFound {
                kind: "head mountable",
                id: head_mountable_id.to_string(),
            })
        }
    }

    fn snapshot() -> MachineSnapshot {
        MachineSnapshot {
            enabled: true,
            homed: false,
            busy: true,
            current_task: Some("move".to_string()),
            motion_planner: Some("ReferenceAdvancedMotionPlanner".to_string()),
            axes: vec![
                AxisState {
                    id: "x".to_string(),
                    name: "X".to_string(),
                    kind: AxisKind::X,
                    coordinate: Some(12.5),
                    units: Some("Millimeters".to_string()),
                    home_coordinate: 0.0,
                },
                AxisState {
                    id: "v".to_string(),
                    name: "Virtual".to_string(),
                    kind: AxisKind::Z,
                    coordinate: None,
                    units: None,
                    home_coordinate: 5.0,
                },
            ],
            heads: vec![HeadState {
                id: "h1".to_string(),
                name: "head1".to_string(),
                nozzle_ids: vec!["n1".to_string()],
                camera_ids: vec!["cam2".to_string()],
                actuator_ids: Vec::new(),
                location: Location {
                    x: 1.0,
                    y: 2.0,
                    z: 3.0,
                    rotation: 90.0,
                },
            }],
            feeders: Vec::new(),
            job: Some(JobProgress {
                name: "panel.job.xml".to_string(),
                file: None,
                state: JobState::Running,
                completed_steps: 3,
                total_steps: 10,
                error_count: 0,
            }),
        }
    }

    #[test]
    fn projects_axes_and_heads() {
        let projector = ModelStatusProjector::new(Arc::new(FixedModel(Ok(snapshot()))));
        let Ok(status) = projector.project() else {
            panic!("projection should succeed");
        };
        assert!(status.enabled);
        assert_eq!(status.axes.len(), 2);
        assert_eq!(status.axes.first().map(|a| a.position), Some(12.5));
        assert_eq!(status.heads.first().map(|h| h.rotation), Some(90.0));
    }

    #[test]
    fn axis_without_coordinate_reports_defaults() {
        let projector = ModelStatusProjector::new(Arc::new(FixedModel(Ok(snapshot()))));
        let Ok(status) = projector.project() else {
            panic!("projection should succeed");
        };
        let Some(virtual_axis) = status.axes.get(1) else {
            panic!("second axis missing");
        };
        assert_eq!(virtual_axis.position, 0.0);
        assert_eq!(virtual_axis.unit, "mm");
        assert!(!virtual_axis.homed);
    }

    #[test]
    fn serializes_camel_case() {
        let projector = ModelStatusProjector::new(Arc::new(FixedModel(Ok(snapshot()))));
        let Ok(status) = projector.project() else {
            panic!("projection should succeed");
        };
        let Ok(json) = serde_json::to_value(&status) else {
            panic!("status should serialize");
        };
        assert_eq!(json["motionPlannerType"], "ReferenceAdvancedMotionPlanner");
        assert_eq!(json["heads"][0]["cameraIds"][0], "cam2");
        assert_eq!(json["job"]["state"], "RUNNING");
    }

    #[test]
    fn model_error_propagates() {
        let projector =
            ModelStatusProjector::new(Arc::new(FixedModel(Err(MachineError::NotConfigured))));
        assert_eq!(projector.project(), Err(MachineError::NotConfigured));
    }
}
