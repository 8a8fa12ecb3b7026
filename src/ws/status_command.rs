//! Text commands accepted on the machine-status socket.
//!
//! The status socket speaks a colon-separated line protocol:
//!
//! | command | reply |
//! |---|---|
//! | `ping` | `pong` |
//! | `getStatus` | status snapshot (JSON) |
//! | `getHeadMountables` | `headMountables:<id>:<name>:<kind>;...` |
//! | `getPosition:<hm>` | `success: <name> at X=.., Y=.., Z=.., Rotation=..` |
//! | `move:<hm>:<x>:<y>:<z>:<rotation>[:<speed>]` | `success: ...` |
//! | `moveAxis:<hm>:<axis>:<coordinate>[:<speed>]` | `success: ...` |
//! | `jog:<hm>:<axis>:<offset>[:<speed>]` | `success: ...` |
//! | `home:all` / `home:<hm>` | `success: ...` |
//! | `stop:all` / `stop:<hm>` | `success: ...` |
//!
//! `<hm>` matches a head-mountable by id or name. `<axis>` is `X`, `Y`, `Z`,
//! `Rotation` or `C`, case-insensitive. In `move`, `NaN`, `null` or an
//! empty coordinate keeps the current value. Speed defaults to 0.5.
//! Failures reply `error: <reason>`.

use std::fmt;

use crate::domain::{HeadMountable, Location, MachineCommands, MachineError, MachineModel};

/// Speed used when a motion command omits it.
pub const DEFAULT_SPEED: f64 = 0.5;

/// Single axis addressed by `moveAxis` and `jog`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetAxis {
    /// X.
    X,
    /// Y.
    Y,
    /// Z.
    Z,
    /// Rotation (`C`).
    Rotation,
}

impl TargetAxis {
    fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "X" => Some(Self::X),
            "Y" => Some(Self::Y),
            "Z" => Some(Self::Z),
            "ROTATION" | "C" => Some(Self::Rotation),
            _ => None,
        }
    }

    fn get(self, location: &Location) -> f64 {
        match self {
            Self::X => location.x,
            Self::Y => location.y,
            Self::Z => location.z,
            Self::Rotation => location.rotation,
        }
    }

    fn set(self, location: &mut Location, value: f64) {
        match self {
            Self::X => location.x = value,
            Self::Y => location.y = value,
            Self::Z => location.z = value,
            Self::Rotation => location.rotation = value,
        }
    }
}

impl fmt::Display for TargetAxis {
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

/// `all` or one head-mountable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The whole machine.
    All,
    /// One head-mountable, by id or name.
    One(String),
}

/// A parsed status-socket command.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusCommand {
    /// `ping`
    Ping,
    /// `getStatus`
    GetStatus,
    /// `getHeadMountables`
    GetHeadMountables,
    /// `getPosition:<hm>`
    GetPosition {
        /// Head-mountable id or name.
        head_mountable: String,
    },
    /// `move:<hm>:<x>:<y>:<z>:<rotation>[:<speed>]`
    Move {
        /// Head-mountable id or name.
        head_mountable: String,
        /// Target X, `None` keeps the current value.
        x: Option<f64>,
        /// Target Y, `None` keeps the current value.
        y: Option<f64>,
        /// Target Z, `None` keeps the current value.
        z: Option<f64>,
        /// Target rotation, `None` keeps the current value.
        rotation: Option<f64>,
        /// Feed-rate fraction.
        speed: f64,
    },
    /// `moveAxis:<hm>:<axis>:<coordinate>[:<speed>]`
    MoveAxis {
        /// Head-mountable id or name.
        head_mountable: String,
        /// Axis to move.
        axis: TargetAxis,
        /// Absolute coordinate.
        coordinate: f64,
        /// Feed-rate fraction.
        speed: f64,
    },
    /// `jog:<hm>:<axis>:<offset>[:<speed>]`
    Jog {
        /// Head-mountable id or name.
        head_mountable: String,
        /// Axis to move.
        axis: TargetAxis,
        /// Relative offset.
        offset: f64,
        /// Feed-rate fraction.
        speed: f64,
    },
    /// `home:all` or `home:<hm>`
    Home(Target),
    /// `stop:all` or `stop:<hm>`
    Stop(Target),
}

/// Why a status-socket command was rejected before reaching the machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// Not a known command.
    #[error("unknown command")]
    Unknown,

    /// Known command with the wrong number of fields.
    #[error("invalid {command} command, expected {usage}")]
    Usage {
        /// Command name.
        command: &'static str,
        /// Expected form.
        usage: &'static str,
    },

    /// A numeric field did not parse.
    #[error("invalid number: {0}")]
    Number(String),

    /// Unrecognized axis token.
    #[error("unknown axis: {0}")]
    Axis(String),

    /// Speed outside `(0, 1]`.
    #[error("speed must be in (0, 1], got {0}")]
    Speed(String),
}

const MOVE_USAGE: &str = "move:<headMountableId>:<x>:<y>:<z>:<rotation>[:<speed>]";
const MOVE_AXIS_USAGE: &str = "moveAxis:<headMountableId>:<axis>:<coordinate>[:<speed>]";
const JOG_USAGE: &str = "jog:<headMountableId>:<axis>:<offset>[:<speed>]";

impl StatusCommand {
    /// Parses one text message.
    ///
    /// # Errors
    ///
    /// Returns a [`CommandError`] describing the first problem found.
    pub fn parse(text: &str) -> Result<Self, CommandError> {
        let text = text.trim();
        match text {
            "ping" => return Ok(Self::Ping),
            "getStatus" => return Ok(Self::GetStatus),
            "getHeadMountables" => return Ok(Self::GetHeadMountables),
            _ => {}
        }

        let parts: Vec<&str> = text.split(':').collect();
        let field = |i: usize| parts.get(i).copied().unwrap_or("");
        let name = field(0);
        let head_mountable = field(1).trim().to_string();

        match name {
            "getPosition" => {
                require(
                    !head_mountable.is_empty(),
                    "getPosition",
                    "getPosition:<headMountableId>",
                )?;
                Ok(Self::GetPosition { head_mountable })
            }
            "move" => {
                require(parts.len() >= 6 && !head_mountable.is_empty(), "move", MOVE_USAGE)?;
                Ok(Self::Move {
                    head_mountable,
                    x: parse_coordinate(field(2))?,
                    y: parse_coordinate(field(3))?,
                    z: parse_coordinate(field(4))?,
                    rotation: parse_coordinate(field(5))?,
                    speed: parse_speed(parts.get(6).copied())?,
                })
            }
            "moveAxis" => {
                require(
                    parts.len() >= 4 && !head_mountable.is_empty(),
                    "moveAxis",
                    MOVE_AXIS_USAGE,
                )?;
                Ok(Self::MoveAxis {
                    head_mountable,
                    axis: parse_axis(field(2))?,
                    coordinate: parse_number(field(3))?,
                    speed: parse_speed(parts.get(4).copied())?,
                })
            }
            "jog" => {
                require(parts.len() >= 4 && !head_mountable.is_empty(), "jog", JOG_USAGE)?;
                Ok(Self::Jog {
                    head_mountable,
                    axis: parse_axis(field(2))?,
                    offset: parse_number(field(3))?,
                    speed: parse_speed(parts.get(4).copied())?,
                })
            }
            "home" => {
                require(
                    !head_mountable.is_empty(),
                    "home",
                    "home:all or home:<headMountableId>",
                )?;
                Ok(Self::Home(target(head_mountable)))
            }
            "stop" => {
                require(
                    !head_mountable.is_empty(),
                    "stop",
                    "stop:all or stop:<headMountableId>",
                )?;
                Ok(Self::Stop(target(head_mountable)))
            }
            _ => Err(CommandError::Unknown),
        }
    }

    /// Command name, for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::GetStatus => "getStatus",
            Self::GetHeadMountables => "getHeadMountables",
            Self::GetPosition { .. } => "getPosition",
            Self::Move { .. } => "move",
            Self::MoveAxis { .. } => "moveAxis",
            Self::Jog { .. } => "jog",
            Self::Home(_) => "home",
            Self::Stop(_) => "stop",
        }
    }
}

fn require(ok: bool, command: &'static str, usage: &'static str) -> Result<(), CommandError> {
    if ok {
        Ok(())
    } else {
        Err(CommandError::Usage { command, usage })
    }
}

fn target(token: String) -> Target {
    if token == "all" {
        Target::All
    } else {
        Target::One(token)
    }
}

fn parse_number(token: &str) -> Result<f64, CommandError> {
    token
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| CommandError::Number(token.to_string()))
}

fn parse_coordinate(token: &str) -> Result<Option<f64>, CommandError> {
    let token = token.trim();
    if token.is_empty() || token == "NaN" || token == "null" {
        return Ok(None);
    }
    parse_number(token).map(Some)
}

fn parse_axis(token: &str) -> Result<TargetAxis, CommandError> {
    TargetAxis::parse(token).ok_or_else(|| CommandError::Axis(token.to_string()))
}

fn parse_speed(token: Option<&str>) -> Result<f64, CommandError> {
    let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(DEFAULT_SPEED);
    };
    let speed = parse_number(token)?;
    if speed > 0.0 && speed <= 1.0 {
        Ok(speed)
    } else {
        Err(CommandError::Speed(token.to_string()))
    }
}

/// Runs a machine command and renders the reply line.
///
/// `ping` and `getStatus` are answered by the connection itself and render
/// as an error here. Motion calls block until the machine finishes, so
/// call this off the async runtime.
pub fn execute(
    command: &StatusCommand,
    model: &dyn MachineModel,
    commands: &dyn MachineCommands,
) -> String {
    match run(command, model, commands) {
        Ok(reply) => {
            tracing::info!(command = command.name(), "status socket command executed");
            reply
        }
        Err(err) => {
            tracing::warn!(command = command.name(), error = %err, "status socket command failed");
            format!("error: {err}")
        }
    }
}

fn run(
    command: &StatusCommand,
    model: &dyn MachineModel,
    commands: &dyn MachineCommands,
) -> Result<String, MachineError> {
    match command {
        StatusCommand::Ping | StatusCommand::GetStatus => {
            Err(MachineError::Other(format!("{} is not a machine command", command.name())))
        }
        StatusCommand::GetHeadMountables => {
            let listing: String = model
                .head_mountables()
                .iter()
                .map(|hm| format!("{}:{}:{};", hm.id, hm.name, hm.kind.as_str()))
                .collect();
            Ok(format!("headMountables:{listing}"))
        }
        StatusCommand::GetPosition { head_mountable } => {
            require_enabled(model)?;
            let hm = find(model, head_mountable)?;
            let at = model.location_of(&hm.id)?;
            Ok(format!(
                "success: {} at X={}, Y={}, Z={}, Rotation={}",
                hm.name, at.x, at.y, at.z, at.rotation
            ))
        }
        StatusCommand::Move {
            head_mountable,
            x,
            y,
            z,
            rotation,
            speed,
        } => {
            require_enabled(model)?;
            let hm = find(model, head_mountable)?;
            let current = model.location_of(&hm.id)?;
            let target = Location {
                x: x.unwrap_or(current.x),
                y: y.unwrap_or(current.y),
                z: z.unwrap_or(current.z),
                rotation: rotation.unwrap_or(current.rotation),
            };
            commands.move_to(&hm.id, target, *speed)?;
            Ok(format!("success: moved {}", hm.name))
        }
        StatusCommand::MoveAxis {
            head_mountable,
            axis,
            coordinate,
            speed,
        } => {
            require_enabled(model)?;
            let hm = find(model, head_mountable)?;
            let mut target = model.location_of(&hm.id)?;
            axis.set(&mut target, *coordinate);
            commands.move_to(&hm.id, target, *speed)?;
            Ok(format!("success: moved {} along {axis}", hm.name))
        }
        StatusCommand::Jog {
            head_mountable,
            axis,
            offset,
            speed,
        } => {
            require_enabled(model)?;
            let hm = find(model, head_mountable)?;
            let mut target = model.location_of(&hm.id)?;
            let jogged = axis.get(&target) + offset;
            axis.set(&mut target, jogged);
            commands.move_to(&hm.id, target, *speed)?;
            Ok(format!("success: jogged {} by {offset} along {axis}", hm.name))
        }
        StatusCommand::Home(Target::All) => {
            require_enabled(model)?;
            commands.home()?;
            Ok("success: machine homed".to_string())
        }
        StatusCommand::Home(Target::One(head_mountable)) => {
            require_enabled(model)?;
            let hm = find(model, head_mountable)?;
            commands.move_to_safe_z(&hm.id)?;
            Ok(format!("success: {} moved to safe Z", hm.name))
        }
        StatusCommand::Stop(Target::All) => {
            commands.emergency_stop()?;
            Ok("success: emergency stop issued".to_string())
        }
        StatusCommand::Stop(Target::One(head_mountable)) => {
            let hm = find(model, head_mountable)?;
            commands.wait_for_stillstand(&hm.id)?;
            Ok(format!("success: {} stopped", hm.name))
        }
    }
}

fn require_enabled(model: &dyn MachineModel) -> Result<(), MachineError> {
    if model.snapshot()?.enabled {
        Ok(())
    } else {
        Err(MachineError::NotEnabled)
    }
}

fn find(model: &dyn MachineModel, identifier: &str) -> Result<HeadMountable, MachineError> {
    model
        .head_mountables()
        .into_iter()
        .find(|hm| hm.id == identifier || hm.name == identifier)
        .ok_or_else(|| MachineError::NotFound {
            kind: "head mountable",
            id: identifier.to_string(),
        })
}
