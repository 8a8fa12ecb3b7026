//! Contracts of the external machine/motion model.
//!
//! The gateway never reaches into machine internals. Everything it needs is
//! expressed by three traits:
//!
//! - [`MachineModel`]: point-in-time queries (flags, axes, heads, job, cameras).
//! - [`MachineCommands`]: the command surface, delegated as-is.
//! - [`ChangeEventSource`]: attribute-level and lifecycle notifications,
//!   delivered on whatever thread the motion layer happens to be on.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::camera::CameraTopology;
use super::frame::{CaptureError, Frame};

/// Attribute name of an axis' logical coordinate.
pub const ATTR_COORDINATE: &str = "coordinate";

/// Attribute name of an axis' raw driver coordinate.
pub const ATTR_DRIVER_COORDINATE: &str = "driverCoordinate";

/// Failure reported by the machine collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MachineError {
    /// No machine is configured.
    #[error("machine is not configured")]
    NotConfigured,

    /// The job operation needs a loaded job.
    #[error("no job loaded")]
    NoJobLoaded,

    /// The command requires an enabled machine.
    #[error("machine is not enabled")]
    NotEnabled,

    /// The referenced head-mountable, camera, or axis does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind (e.g. `"camera"`).
        kind: &'static str,
        /// Requested identifier.
        id: String,
    },

    /// Capture through the command surface failed.
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// Any other collaborator failure.
    #[error("machine error: {0}")]
    Other(String),
}

/// Cartesian location plus rotation, in millimetres and degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, ToSchema)]
pub struct Location {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Z coordinate.
    pub z: f64,
    /// Rotation in degrees.
    pub rotation: f64,
}

/// Axis category as reported by the motion model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AxisKind {
    /// X axis.
    X,
    /// Y axis.
    Y,
    /// Z axis.
    Z,
    /// Rotation axis.
    Rotation,
}

impl fmt::Display for AxisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::X => "X",
            Self::Y => "Y",
            Self::Z => "Z",
            Self::Rotation => "Rotation",
        };
        f.write_str(name)
    }
}

/// Kind of device carried by a head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HeadMountableKind {
    /// Head-mounted camera.
    Camera,
    /// Nozzle.
    Nozzle,
}

impl HeadMountableKind {
    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Camera => "camera",
            Self::Nozzle => "nozzle",
        }
    }
}

/// A camera or nozzle that can be moved by its head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadMountable {
    /// Identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Device kind.
    pub kind: HeadMountableKind,
    /// Owning head.
    pub head_id: String,
}

/// Current state of one axis.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisState {
    /// Axis identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Axis category.
    pub kind: AxisKind,
    /// Logical coordinate, `None` for axes without a coordinate
    /// (e.g. virtual or reference axes).
    pub coordinate: Option<f64>,
    /// Units of `coordinate`, `None` when the axis has no controller.
    pub units: Option<String>,
    /// Coordinate the axis is set to on homing.
    pub home_coordinate: f64,
}

/// Current state of one head.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadState {
    /// Head identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Nozzles mounted on the head.
    pub nozzle_ids: Vec<String>,
    /// Cameras mounted on the head.
    pub camera_ids: Vec<String>,
    /// Actuators mounted on the head.
    pub actuator_ids: Vec<String>,
    /// Current head location.
    pub location: Location,
}

/// Current state of one feeder.
#[derive(Debug, Clone, PartialEq)]
pub struct FeederState {
    /// Feeder identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Feeder implementation type.
    pub kind: String,
    /// Part loaded in the feeder.
    pub part_id: Option<String>,
    /// Whether the feeder is enabled.
    pub enabled: bool,
    /// Parts fed so far.
    pub feed_count: u32,
}

/// Lifecycle of the currently loaded job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Loaded, not started.
    Stopped,
    /// Executing.
    Running,
    /// Paused by the operator.
    Paused,
    /// Stopped after an error.
    Error,
}

/// Progress of the currently loaded job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobProgress {
    /// Job name, usually the file name.
    pub name: String,
    /// Path the job was loaded from.
    pub file: Option<String>,
    /// Job lifecycle state.
    pub state: JobState,
    /// Steps finished so far.
    pub completed_steps: u32,
    /// Total steps in the job.
    pub total_steps: u32,
    /// Errors encountered so far.
    pub error_count: u32,
}

/// Point-in-time view of the machine, as returned by [`MachineModel::snapshot`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MachineSnapshot {
    /// Machine is enabled.
    pub enabled: bool,
    /// Machine has been homed since it was enabled.
    pub homed: bool,
    /// Machine is executing a motion or task.
    pub busy: bool,
    /// Description of the running task, if any.
    pub current_task: Option<String>,
    /// Motion planner implementation name.
    pub motion_planner: Option<String>,
    /// All axes in enumeration order.
    pub axes: Vec<AxisState>,
    /// All heads in enumeration order.
    pub heads: Vec<HeadState>,
    /// All feeders in enumeration order.
    pub feeders: Vec<FeederState>,
    /// Currently loaded job, if any.
    pub job: Option<JobProgress>,
}

/// Query surface of the machine model.
pub trait MachineModel: Send + Sync + fmt::Debug {
    /// Reads the current machine state.
    ///
    /// # Errors
    ///
    /// Returns a [`MachineError`] if the model cannot be read
    /// (e.g. no machine configured).
    fn snapshot(&self) -> Result<MachineSnapshot, MachineError>;

    /// Returns the current camera topology.
    fn camera_topology(&self) -> CameraTopology;

    /// Every camera and nozzle carried by a head, head by head, cameras
    /// before nozzles.
    fn head_mountables(&self) -> Vec<HeadMountable>;

    /// Current location of a head-mountable.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::NotFound`] for unknown ids.
    fn location_of(&self, head_mountable_id: &str) -> Result<Location, MachineError>;
}

/// Command surface of the machine model. The gateway only forwards these.
pub trait MachineCommands: Send + Sync + fmt::Debug {
    /// Enables the machine.
    ///
    /// # Errors
    ///
    /// Returns a [`MachineError`] if the machine refuses to enable.
    fn enable(&self) -> Result<(), MachineError>;

    /// Disables the machine.
    ///
    /// # Errors
    ///
    /// Returns a [`MachineError`] if the machine refuses to disable.
    fn disable(&self) -> Result<(), MachineError>;

    /// Homes all axes.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::NotEnabled`] if the machine is disabled.
    fn home(&self) -> Result<(), MachineError>;

    /// Stops all motion and disables the machine immediately.
    ///
    /// # Errors
    ///
    /// Returns a [`MachineError`] if the stop could not be issued.
    fn emergency_stop(&self) -> Result<(), MachineError>;

    /// Moves a head-mountable (nozzle or camera) to `target`.
    ///
    /// `speed` is a fraction of the maximum feed rate in `(0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::NotEnabled`] or [`MachineError::NotFound`].
    fn move_to(&self, head_mountable_id: &str, target: Location, speed: f64)
    -> Result<(), MachineError>;

    /// Raises a head-mountable to the safe Z height without moving X/Y.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::NotEnabled`] or [`MachineError::NotFound`].
    fn move_to_safe_z(&self, head_mountable_id: &str) -> Result<(), MachineError>;

    /// Blocks until the head-mountable's motion has come to a standstill.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::NotFound`] for unknown ids.
    fn wait_for_stillstand(&self, head_mountable_id: &str) -> Result<(), MachineError>;

    /// Loads a job from `path`, replacing any stopped job.
    ///
    /// # Errors
    ///
    /// Returns a [`MachineError`] if the file cannot be loaded or a job is
    /// running.
    fn load_job(&self, path: &str) -> Result<(), MachineError>;

    /// Starts (or resumes) the loaded job.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::NotEnabled`] or [`MachineError::NoJobLoaded`].
    fn start_job(&self) -> Result<(), MachineError>;

    /// Pauses the running job.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::NoJobLoaded`].
    fn pause_job(&self) -> Result<(), MachineError>;

    /// Stops the loaded job.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::NoJobLoaded`].
    fn stop_job(&self) -> Result<(), MachineError>;

    /// Captures a single frame from the given camera.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::NotFound`] for unknown cameras or
    /// [`MachineError::Capture`] when the device fails.
    fn capture(&self, camera_id: &str) -> Result<Frame, MachineError>;
}

/// Composite key identifying one observed attribute: `(entity, attribute)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChangeKey {
    /// Entity identifier (e.g. an axis id).
    pub entity: String,
    /// Attribute name (e.g. [`ATTR_COORDINATE`]).
    pub attribute: String,
}

impl ChangeKey {
    /// Creates a key from its parts.
    #[must_use]
    pub fn new(entity: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            attribute: attribute.into(),
        }
    }
}

impl fmt::Display for ChangeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.entity, self.attribute)
    }
}

/// Value of an observed attribute, compared by value for deduplication.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// Numeric value (coordinates).
    Number(f64),
    /// Boolean value.
    Flag(bool),
    /// Textual value.
    Text(String),
}

/// Coarse machine lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineEvent {
    /// Machine was enabled.
    Enabled,
    /// Enabling failed.
    EnableFailed {
        /// Reason given by the machine.
        reason: String,
    },
    /// Machine is about to be disabled.
    AboutToBeDisabled {
        /// Reason given by the machine.
        reason: String,
    },
    /// Machine was disabled.
    Disabled {
        /// Reason given by the machine.
        reason: String,
    },
    /// Disabling failed.
    DisableFailed {
        /// Reason given by the machine.
        reason: String,
    },
    /// Homing finished (or was invalidated).
    Homed {
        /// New homed flag.
        homed: bool,
    },
    /// Busy flag changed.
    Busy {
        /// New busy flag.
        busy: bool,
    },
    /// An actuator fired.
    ActuatorActivity {
        /// Actuator identifier.
        actuator_id: String,
    },
    /// The loaded job was loaded, started, paused, or stopped.
    JobStateChanged {
        /// New job state.
        state: JobState,
    },
}

impl MachineEvent {
    /// Short stable name, used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Enabled => "machine_enabled",
            Self::EnableFailed { .. } => "machine_enable_failed",
            Self::AboutToBeDisabled { .. } => "machine_about_to_be_disabled",
            Self::Disabled { .. } => "machine_disabled",
            Self::DisableFailed { .. } => "machine_disable_failed",
            Self::Homed { .. } => "machine_homed",
            Self::Busy { .. } => "machine_busy",
            Self::ActuatorActivity { .. } => "actuator_activity",
            Self::JobStateChanged { .. } => "job_state_changed",
        }
    }
}

/// Notification delivered to a [`ChangeListener`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeNotification {
    /// An axis attribute changed.
    Attribute {
        /// Which attribute.
        key: ChangeKey,
        /// Its new value.
        value: AttributeValue,
    },
    /// A lifecycle event.
    Lifecycle(MachineEvent),
    /// A head moved or a user targeted a head-mountable; axis values
    /// should be re-read.
    HeadActivity {
        /// Head identifier.
        head_id: String,
        /// Whether this came from jogging.
        jogging: bool,
    },
    /// Axes were added to or removed from the machine.
    AxesChanged,
}

/// Receiver of [`ChangeNotification`]s. May be invoked from any thread.
pub trait ChangeListener: Send + Sync + fmt::Debug {
    /// Handles one notification. Must not block.
    fn on_change(&self, notification: ChangeNotification);
}

/// Handle returned by listener registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Change-notification surface of the machine model.
pub trait ChangeEventSource: Send + Sync + fmt::Debug {
    /// Registers a listener for machine-level notifications: lifecycle
    /// events, head activity, and axis-set changes.
    fn add_machine_listener(&self, listener: Arc<dyn ChangeListener>) -> ListenerId;

    /// Registers a listener for attribute changes of one axis.
    ///
    /// Returns `None` if the axis does not exist or has no observable
    /// attributes.
    fn add_axis_listener(
        &self,
        axis_id: &str,
        listener: Arc<dyn ChangeListener>,
    ) -> Option<ListenerId>;

    /// Unregisters a listener. Unknown handles are ignored.
    fn remove_listener(&self, id: ListenerId);

    /// Identifiers of the axes whose attributes can be observed.
    fn observed_axes(&self) -> Vec<String>;

    /// Current values of every observable attribute of one axis.
    fn axis_attributes(&self, axis_id: &str) -> Vec<(String, AttributeValue)>;
}
