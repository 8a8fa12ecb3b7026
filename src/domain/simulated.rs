//! In-process machine used when no hardware driver is attached.
//!
//! [`SimulatedMachine`] implements every collaborator contract: it answers
//! status queries, executes commands by updating its own state, and emits
//! the same notifications a real motion layer would (a burst of coordinate
//! updates per move, lifecycle events on enable/disable/home, axis-set
//! changes). Cameras are [`SyntheticCamera`]s producing a moving test
//! pattern, with failure injection for exercising the stream error paths.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::RwLock;

use super::camera::{CameraHandle, CameraTopology, HeadCameras};
use super::frame::{CaptureError, Frame, FrameSource, PixelFormat};
use super::machine::{
    ATTR_COORDINATE, ATTR_DRIVER_COORDINATE, AttributeValue, AxisKind, AxisState, ChangeEventSource,
    ChangeKey, ChangeListener, ChangeNotification, FeederState, HeadMountable, HeadMountableKind,
    HeadState, JobProgress, JobState, ListenerId, Location, MachineCommands, MachineError,
    MachineEvent, MachineModel, MachineSnapshot,
};

/// Number of intermediate coordinate updates emitted per move.
const MOVE_STEPS: u32 = 5;

/// Z height head-mountables retreat to before travelling.
const SAFE_Z: f64 = 0.0;

/// Placements in every simulated job.
const JOB_PLACEMENTS: u32 = 12;

/// Camera producing a synthetic RGB test pattern.
///
/// Each capture advances a frame counter that shifts the pattern, so
/// consecutive frames differ. Failures can be injected with
/// [`Self::fail_next`] and malformed buffers with [`Self::malform_next`].
#[derive(Debug)]
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    frame_counter: AtomicU64,
    fail_remaining: AtomicU32,
    malformed_remaining: AtomicU32,
}

impl SyntheticCamera {
    /// Creates a camera producing `width` x `height` RGB frames.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_counter: AtomicU64::new(0),
            fail_remaining: AtomicU32::new(0),
            malformed_remaining: AtomicU32::new(0),
        }
    }

    /// Makes the next `count` captures fail with a device error.
    pub fn fail_next(&self, count: u32) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` captures return a truncated pixel buffer.
    pub fn malform_next(&self, count: u32) {
        self.malformed_remaining.store(count, Ordering::SeqCst);
    }

    /// Number of captures attempted so far, failed ones included.
    #[must_use]
    pub fn capture_count(&self) -> u64 {
        self.frame_counter.load(Ordering::SeqCst)
    }

    fn take_one(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn render(&self, frame_no: u64) -> Vec<u8> {
        let w = u64::from(self.width.max(1));
        let h = u64::from(self.height.max(1));
        let bar = (frame_no * 4) % w;
        let blue = ((frame_no * 8) % 256) as u8;
        let mut data = Vec::with_capacity((w * h * 3) as usize);
        for y in 0..h {
            for x in 0..w {
                if x == bar {
                    data.extend_from_slice(&[255, 255, 255]);
                } else {
                    data.push((x * 255 / w) as u8);
                    data.push((y * 255 / h) as u8);
                    data.push(blue);
                }
            }
        }
        data
    }
}

impl FrameSource for SyntheticCamera {
    fn capture(&self) -> Result<Option<Frame>, CaptureError> {
        let frame_no = self.frame_counter.fetch_add(1, Ordering::SeqCst);
        if Self::take_one(&self.fail_remaining) {
            return Err(CaptureError::Device(format!(
                "injected failure on capture {frame_no}"
            )));
        }
        let mut data = self.render(frame_no);
        if Self::take_one(&self.malformed_remaining) {
            data.truncate(data.len() / 2);
        }
        Ok(Some(Frame::new(self.width, self.height, PixelFormat::Rgb8, data)))
    }
}

#[derive(Debug, Clone)]
struct SimAxis {
    id: String,
    name: String,
    kind: AxisKind,
    coordinate: f64,
    home_coordinate: f64,
}

impl SimAxis {
    fn new(id: &str, kind: AxisKind) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_uppercase(),
            kind,
            coordinate: 0.0,
            home_coordinate: 0.0,
        }
    }

    fn component(&self, location: &Location) -> f64 {
        match self.kind {
            AxisKind::X => location.x,
            AxisKind::Y => location.y,
            AxisKind::Z => location.z,
            AxisKind::Rotation => location.rotation,
        }
    }
}

#[derive(Debug, Clone)]
struct SimCamera {
    id: String,
    name: String,
    camera: Arc<SyntheticCamera>,
}

impl SimCamera {
    fn handle(&self) -> CameraHandle {
        CameraHandle {
            id: self.id.clone(),
            name: self.name.clone(),
            kind: "SyntheticCamera".to_string(),
            width: self.camera.width,
            height: self.camera.height,
            source: Arc::clone(&self.camera) as Arc<dyn FrameSource>,
        }
    }
}

#[derive(Debug)]
struct SimState {
    enabled: bool,
    homed: bool,
    busy: bool,
    current_task: Option<String>,
    axes: Vec<SimAxis>,
    head_id: String,
    head_name: String,
    nozzle_ids: Vec<String>,
    actuator_ids: Vec<String>,
    head_location: Location,
    machine_cameras: Vec<SimCamera>,
    head_cameras: Vec<SimCamera>,
    feeders: Vec<FeederState>,
    job: Option<JobProgress>,
}

#[derive(Debug)]
enum ListenerScope {
    Machine,
    Axis(String),
}

#[derive(Debug)]
struct Registration {
    scope: ListenerScope,
    listener: Arc<dyn ChangeListener>,
}

/// Simulated pick-and-place machine: axes `x`, `y`, `z`, `c`, one
/// machine-level camera `bottom`, and one head `H1` carrying camera `top`
/// and nozzles `n1`, `n2`.
#[derive(Debug)]
pub struct SimulatedMachine {
    state: RwLock<SimState>,
    listeners: RwLock<HashMap<ListenerId, Registration>>,
    next_listener: AtomicU64,
}

impl SimulatedMachine {
    /// Creates the default machine with cameras of the given frame size.
    #[must_use]
    pub fn new(camera_width: u32, camera_height: u32) -> Self {
        let camera = |id: &str, name: &str| SimCamera {
            id: id.to_string(),
            name: name.to_string(),
            camera: Arc::new(SyntheticCamera::new(camera_width, camera_height)),
        };
        let state = SimState {
            enabled: false,
            homed: false,
            busy: false,
            current_task: None,
            axes: vec![
                SimAxis::new("x", AxisKind::X),
                SimAxis::new("y", AxisKind::Y),
                SimAxis::new("z", AxisKind::Z),
                SimAxis::new("c", AxisKind::Rotation),
            ],
            head_id: "h1".to_string(),
            head_name: "H1".to_string(),
            nozzle_ids: vec!["n1".to_string(), "n2".to_string()],
            actuator_ids: vec!["vacuum".to_string()],
            head_location: Location::default(),
            machine_cameras: vec![camera("bottom", "Bottom Camera")],
            head_cameras: vec![camera("top", "Top Camera")],
            feeders: vec![FeederState {
                id: "f1".to_string(),
                name: "Strip 0402".to_string(),
                kind: "ReferenceStripFeeder".to_string(),
                part_id: Some("R0402-10K".to_string()),
                enabled: true,
                feed_count: 0,
            }],
            job: None,
        };
        Self {
            state: RwLock::new(state),
            listeners: RwLock::new(HashMap::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Returns the synthetic camera with the given id, wherever it is mounted.
    #[must_use]
    pub fn camera(&self, camera_id: &str) -> Option<Arc<SyntheticCamera>> {
        let state = self.state.read();
        state
            .machine_cameras
            .iter()
            .chain(state.head_cameras.iter())
            .find(|c| c.id == camera_id)
            .map(|c| Arc::clone(&c.camera))
    }

    /// Adds a machine-level camera.
    pub fn add_machine_camera(&self, camera_id: &str, name: &str, camera: Arc<SyntheticCamera>) {
        self.state.write().machine_cameras.push(SimCamera {
            id: camera_id.to_string(),
            name: name.to_string(),
            camera,
        });
    }

    /// Removes a camera from wherever it is mounted. Returns `true` if found.
    pub fn remove_camera(&self, camera_id: &str) -> bool {
        let mut state = self.state.write();
        let before = state.machine_cameras.len() + state.head_cameras.len();
        state.machine_cameras.retain(|c| c.id != camera_id);
        state.head_cameras.retain(|c| c.id != camera_id);
        before != state.machine_cameras.len() + state.head_cameras.len()
    }

    /// Adds an axis and announces the axis-set change.
    pub fn add_axis(&self, axis_id: &str, kind: AxisKind) {
        self.state.write().axes.push(SimAxis::new(axis_id, kind));
        self.notify_machine(ChangeNotification::AxesChanged);
    }

    /// Removes an axis and announces the axis-set change.
    /// Returns `true` if the axis existed.
    pub fn remove_axis(&self, axis_id: &str) -> bool {
        let removed = {
            let mut state = self.state.write();
            let before = state.axes.len();
            state.axes.retain(|a| a.id != axis_id);
            before != state.axes.len()
        };
        if removed {
            self.notify_machine(ChangeNotification::AxesChanged);
        }
        removed
    }

    /// Sets one axis coordinate directly, as a driver position report would.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::NotFound`] for unknown axes.
    pub fn report_coordinate(&self, axis_id: &str, coordinate: f64) -> Result<(), MachineError> {
        {
            let mut state = self.state.write();
            let axis = state
                .axes
                .iter_mut()
                .find(|a| a.id == axis_id)
                .ok_or_else(|| MachineError::NotFound {
                    kind: "axis",
                    id: axis_id.to_string(),
                })?;
            axis.coordinate = coordinate;
        }
        self.notify_axis(axis_id, coordinate);
        Ok(())
    }

    /// Fires an actuator.
    pub fn fire_actuator(&self, actuator_id: &str) {
        self.notify_machine(ChangeNotification::Lifecycle(
            MachineEvent::ActuatorActivity {
                actuator_id: actuator_id.to_string(),
            },
        ));
    }

    /// Marks up to `count` placements of the running job as done. The job
    /// stops on its own after the last placement. Returns the completed
    /// count, or `None` if no job is running.
    pub fn advance_job(&self, count: u32) -> Option<u32> {
        let (completed, finished) = {
            let mut state = self.state.write();
            let job = state.job.as_mut().filter(|j| j.state == JobState::Running)?;
            job.completed_steps = job.completed_steps.saturating_add(count).min(job.total_steps);
            let finished = job.completed_steps == job.total_steps;
            if finished {
                job.state = JobState::Stopped;
            }
            (job.completed_steps, finished)
        };
        if finished {
            self.job_state_changed(JobState::Stopped);
            self.set_busy(false, None);
        }
        Some(completed)
    }

    /// Number of registered listeners, across all scopes.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn listeners_for(&self, axis_id: Option<&str>) -> Vec<Arc<dyn ChangeListener>> {
        self.listeners
            .read()
            .values()
            .filter(|r| match (&r.scope, axis_id) {
                (ListenerScope::Machine, None) => true,
                (ListenerScope::Axis(id), Some(target)) => id == target,
                _ => false,
            })
            .map(|r| Arc::clone(&r.listener))
            .collect()
    }

    fn notify_machine(&self, notification: ChangeNotification) {
        for listener in self.listeners_for(None) {
            listener.on_change(notification.clone());
        }
    }

    fn notify_axis(&self, axis_id: &str, coordinate: f64) {
        let listeners = self.listeners_for(Some(axis_id));
        for attribute in [ATTR_COORDINATE, ATTR_DRIVER_COORDINATE] {
            let notification = ChangeNotification::Attribute {
                key: ChangeKey::new(axis_id, attribute),
                value: AttributeValue::Number(coordinate),
            };
            for listener in &listeners {
                listener.on_change(notification.clone());
            }
        }
    }

    fn set_busy(&self, busy: bool, task: Option<&str>) {
        {
            let mut state = self.state.write();
            state.busy = busy;
            state.current_task = task.map(str::to_string);
        }
        self.notify_machine(ChangeNotification::Lifecycle(MachineEvent::Busy { busy }));
    }

    fn job_state_changed(&self, state: JobState) {
        self.notify_machine(ChangeNotification::Lifecycle(MachineEvent::JobStateChanged {
            state,
        }));
    }

    /// Moves the loaded job to `next`. Returns the previous state.
    fn transition_job(&self, next: JobState) -> Result<JobState, MachineError> {
        let previous = {
            let mut state = self.state.write();
            let job = state.job.as_mut().ok_or(MachineError::NoJobLoaded)?;
            std::mem::replace(&mut job.state, next)
        };
        if previous != next {
            self.job_state_changed(next);
        }
        Ok(previous)
    }

    fn require_head_mountable(&self, id: &str) -> Result<(), MachineError> {
        if self.is_head_mountable(id) {
            Ok(())
        } else {
            Err(MachineError::NotFound {
                kind: "head mountable",
                id: id.to_string(),
            })
        }
    }

    fn require_enabled(&self) -> Result<(), MachineError> {
        if self.state.read().enabled {
            Ok(())
        } else {
            Err(MachineError::NotEnabled)
        }
    }

    fn disable_with_reason(&self, reason: &str) {
        self.notify_machine(ChangeNotification::Lifecycle(
            MachineEvent::AboutToBeDisabled {
                reason: reason.to_string(),
            },
        ));
        let job_stopped = {
            let mut state = self.state.write();
            state.enabled = false;
            state.homed = false;
            state.busy = false;
            state.current_task = None;
            match state.job.as_mut() {
                Some(job) if job.state != JobState::Stopped => {
                    job.state = JobState::Stopped;
                    true
                }
                _ => false,
            }
        };
        if job_stopped {
            self.job_state_changed(JobState::Stopped);
        }
        self.notify_machine(ChangeNotification::Lifecycle(MachineEvent::Disabled {
            reason: reason.to_string(),
        }));
    }

    fn is_head_mountable(&self, id: &str) -> bool {
        let state = self.state.read();
        state.nozzle_ids.iter().any(|n| n == id) || state.head_cameras.iter().any(|c| c.id == id)
    }
}

impl MachineModel for SimulatedMachine {
    fn snapshot(&self) -> Result<MachineSnapshot, MachineError> {
        let state = self.state.read();
        Ok(MachineSnapshot {
            enabled: state.enabled,
            homed: state.homed,
            busy: state.busy,
            current_task: state.current_task.clone(),
            motion_planner: Some("SimulatedMotionPlanner".to_string()),
            axes: state
                .axes
                .iter()
                .map(|a| AxisState {
                    id: a.id.clone(),
                    name: a.name.clone(),
                    kind: a.kind,
                    coordinate: Some(a.coordinate),
                    units: Some("Millimeters".to_string()),
                    home_coordinate: a.home_coordinate,
                })
                .collect(),
            heads: vec![HeadState {
                id: state.head_id.clone(),
                name: state.head_name.clone(),
                nozzle_ids: state.nozzle_ids.clone(),
                camera_ids: state.head_cameras.iter().map(|c| c.id.clone()).collect(),
                actuator_ids: state.actuator_ids.clone(),
                location: state.head_location,
            }],
            feeders: state.feeders.clone(),
            job: state.job.clone(),
        })
    }

    fn camera_topology(&self) -> CameraTopology {
        let state = self.state.read();
        CameraTopology {
            machine_cameras: state.machine_cameras.iter().map(SimCamera::handle).collect(),
            heads: vec![HeadCameras {
                head_id: state.head_id.clone(),
                head_name: state.head_name.clone(),
                cameras: state.head_cameras.iter().map(SimCamera::handle).collect(),
            }],
        }
    }

    fn head_mountables(&self) -> Vec<HeadMountable> {
        let state = self.state.read();
        let cameras = state.head_cameras.iter().map(|c| HeadMountable {
            id: c.id.clone(),
            name: c.name.clone(),
            kind: HeadMountableKind::Camera,
            head_id: state.head_id.clone(),
        });
        let nozzles = state.nozzle_ids.iter().map(|id| HeadMountable {
            id: id.clone(),
            name: id.to_uppercase(),
            kind: HeadMountableKind::Nozzle,
            head_id: state.head_id.clone(),
        });
        cameras.chain(nozzles).collect()
    }

    fn location_of(&self, head_mountable_id: &str) -> Result<Location, MachineError> {
        self.require_head_mountable(head_mountable_id)?;
        Ok(self.state.read().head_location)
    }
}

impl MachineCommands for SimulatedMachine {
    fn enable(&self) -> Result<(), MachineError> {
        {
            let mut state = self.state.write();
            if state.enabled {
                return Ok(());
            }
            state.enabled = true;
        }
        tracing::info!("simulated machine enabled");
        self.notify_machine(ChangeNotification::Lifecycle(MachineEvent::Enabled));
        Ok(())
    }

    fn disable(&self) -> Result<(), MachineError> {
        if !self.state.read().enabled {
            return Ok(());
        }
        self.disable_with_reason("user request");
        tracing::info!("simulated machine disabled");
        Ok(())
    }

    fn home(&self) -> Result<(), MachineError> {
        self.require_enabled()?;
        self.set_busy(true, Some("homing"));
        let homed: Vec<(String, f64)> = {
            let mut state = self.state.write();
            for axis in &mut state.axes {
                axis.coordinate = axis.home_coordinate;
            }
            state.head_location = Location::default();
            state.homed = true;
            state
                .axes
                .iter()
                .map(|a| (a.id.clone(), a.coordinate))
                .collect()
        };
        for (axis_id, coordinate) in &homed {
            self.notify_axis(axis_id, *coordinate);
        }
        self.notify_machine(ChangeNotification::Lifecycle(MachineEvent::Homed {
            homed: true,
        }));
        self.set_busy(false, None);
        Ok(())
    }

    fn emergency_stop(&self) -> Result<(), MachineError> {
        tracing::warn!("simulated machine emergency stop");
        self.disable_with_reason("emergency stop");
        Ok(())
    }

    fn move_to(
        &self,
        head_mountable_id: &str,
        target: Location,
        speed: f64,
    ) -> Result<(), MachineError> {
        self.require_enabled()?;
        self.require_head_mountable(head_mountable_id)?;
        let speed = if speed > 0.0 && speed <= 1.0 { speed } else { 0.5 };
        tracing::debug!(head_mountable_id, ?target, speed, "simulated move");

        self.set_busy(true, Some("move"));
        let start = self.state.read().head_location;
        for step in 1..=MOVE_STEPS {
            let t = f64::from(step) / f64::from(MOVE_STEPS);
            let at = Location {
                x: start.x + (target.x - start.x) * t,
                y: start.y + (target.y - start.y) * t,
                z: start.z + (target.z - start.z) * t,
                rotation: start.rotation + (target.rotation - start.rotation) * t,
            };
            let moved: Vec<(String, f64)> = {
                let mut state = self.state.write();
                state.head_location = at;
                state
                    .axes
                    .iter_mut()
                    .filter_map(|axis| {
                        let next = axis.component(&at);
                        (next != axis.coordinate).then(|| {
                            axis.coordinate = next;
                            (axis.id.clone(), next)
                        })
                    })
                    .collect()
            };
            for (axis_id, coordinate) in &moved {
                self.notify_axis(axis_id, *coordinate);
            }
        }
        let head_id = self.state.read().head_id.clone();
        self.notify_machine(ChangeNotification::HeadActivity {
            head_id,
            jogging: false,
        });
        self.set_busy(false, None);
        Ok(())
    }

    fn move_to_safe_z(&self, head_mountable_id: &str) -> Result<(), MachineError> {
        let current = self.location_of(head_mountable_id)?;
        self.move_to(
            head_mountable_id,
            Location {
                z: SAFE_Z,
                ..current
            },
            1.0,
        )
    }

    fn wait_for_stillstand(&self, head_mountable_id: &str) -> Result<(), MachineError> {
        // simulated moves complete before move_to returns
        self.require_head_mountable(head_mountable_id)
    }

    fn load_job(&self, path: &str) -> Result<(), MachineError> {
        let name = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| MachineError::Other(format!("invalid job file: {path}")))?
            .to_string();
        {
            let mut state = self.state.write();
            if state.job.as_ref().is_some_and(|j| j.state != JobState::Stopped) {
                return Err(MachineError::Other(
                    "stop the current job before loading another".to_string(),
                ));
            }
            state.job = Some(JobProgress {
                name,
                file: Some(path.to_string()),
                state: JobState::Stopped,
                completed_steps: 0,
                total_steps: JOB_PLACEMENTS,
                error_count: 0,
            });
        }
        tracing::info!(path, "simulated job loaded");
        self.job_state_changed(JobState::Stopped);
        Ok(())
    }

    fn start_job(&self) -> Result<(), MachineError> {
        self.require_enabled()?;
        {
            let mut state = self.state.write();
            let job = state.job.as_mut().ok_or(MachineError::NoJobLoaded)?;
            if job.state == JobState::Stopped {
                job.completed_steps = 0;
                job.error_count = 0;
            }
        }
        if self.transition_job(JobState::Running)? != JobState::Running {
            self.set_busy(true, Some("job"));
        }
        Ok(())
    }

    fn pause_job(&self) -> Result<(), MachineError> {
        let running = self.state.read().job.as_ref().map(|j| j.state);
        match running {
            None => Err(MachineError::NoJobLoaded),
            Some(JobState::Running) => {
                self.transition_job(JobState::Paused)?;
                self.set_busy(false, None);
                Ok(())
            }
            Some(_) => Ok(()),
        }
    }

    fn stop_job(&self) -> Result<(), MachineError> {
        if self.transition_job(JobState::Stopped)? == JobState::Running {
            self.set_busy(false, None);
        }
        Ok(())
    }

    fn capture(&self, camera_id: &str) -> Result<Frame, MachineError> {
        let topology = self.camera_topology();
        let camera = topology
            .resolve(camera_id)
            .ok_or_else(|| MachineError::NotFound {
                kind: "camera",
                id: camera_id.to_string(),
            })?;
        camera.source.capture()?.ok_or_else(|| {
            MachineError::Capture(CaptureError::Unavailable(
                "camera returned no image".to_string(),
            ))
        })
    }
}

impl ChangeEventSource for SimulatedMachine {
    fn add_machine_listener(&self, listener: Arc<dyn ChangeListener>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().insert(
            id,
            Registration {
                scope: ListenerScope::Machine,
                listener,
            },
        );
        id
    }

    fn add_axis_listener(
        &self,
        axis_id: &str,
        listener: Arc<dyn ChangeListener>,
    ) -> Option<ListenerId> {
        if !self.state.read().axes.iter().any(|a| a.id == axis_id) {
            return None;
        }
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().insert(
            id,
            Registration {
                scope: ListenerScope::Axis(axis_id.to_string()),
                listener,
            },
        );
        Some(id)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.write().remove(&id);
    }

    fn observed_axes(&self) -> Vec<String> {
        self.state.read().axes.iter().map(|a| a.id.clone()).collect()
    }

    fn axis_attributes(&self, axis_id: &str) -> Vec<(String, AttributeValue)> {
        self.state
            .read()
            .axes
            .iter()
            .find(|a| a.id == axis_id)
            .map(|a| {
                vec![
                    (ATTR_COORDINATE.to_string(), AttributeValue::Number(a.coordinate)),
                    (
                        ATTR_DRIVER_COORDINATE.to_string(),
                        AttributeValue::Number(a.coordinate),
                    ),
                ]
            })
            .unwrap_or_default()
    }
}
