// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the incoming commands and the state shared between the message producers and the
//! cycle thread.
//!
//! Every producer writes through a [`ServoInput`]. All shared values live behind a single lock
//! which is only held to copy a value in or out; the cycle copies a consistent
//! [`InputSnapshot`] at its start and runs the numerics without holding it.
use std::sync::Arc;
use std::time::Duration;

use nalgebra::{Isometry3, Vector3};
use parking_lot::Mutex;
use tracing::warn;

use crate::servo::joint_state::{JointSet, JointStateMessage};
use crate::servo::kinematics::TASK_DIMENSIONS;
use crate::servo::parameters::{CommandInType, ServoParameters};
use crate::utils::{stack_twist, CartesianVector, JointVector};

/// Cartesian velocity command.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TwistCommand {
    /// Linear velocity `[x, y, z]`.
    pub linear: Vector3<f64>,
    /// Angular velocity `[roll, pitch, yaw]`.
    pub angular: Vector3<f64>,
    /// Frame the twist is expressed in. Empty means the default command frame.
    pub frame_id: String,
    /// Time stamp on the servo clock. [`Duration::ZERO`] means no stamp.
    pub stamp: Duration,
}

impl TwistCommand {
    pub fn new<S: Into<String>>(
        linear: Vector3<f64>,
        angular: Vector3<f64>,
        frame_id: S,
        stamp: Duration,
    ) -> Self {
        TwistCommand {
            linear,
            angular,
            frame_id: frame_id.into(),
            stamp,
        }
    }

    /// The twist as `[x, y, z, roll, pitch, yaw]`.
    pub fn as_vector(&self) -> CartesianVector {
        stack_twist(&self.linear, &self.angular)
    }

    pub fn is_non_zero(&self) -> bool {
        self.as_vector().iter().any(|&component| component != 0.)
    }
}

/// Joint velocity command for a subset of the servoed joints.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JointJogCommand {
    pub joint_names: Vec<String>,
    pub velocities: Vec<f64>,
    /// Time stamp on the servo clock. [`Duration::ZERO`] means no stamp.
    pub stamp: Duration,
}

impl JointJogCommand {
    pub fn new(joint_names: Vec<String>, velocities: Vec<f64>, stamp: Duration) -> Self {
        JointJogCommand {
            joint_names,
            velocities,
            stamp,
        }
    }

    pub fn is_non_zero(&self) -> bool {
        self.velocities.iter().any(|&velocity| velocity != 0.)
    }
}

/// Reasons to discard a command for one cycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CommandRejection {
    NotANumber,
    OutOfUnitRange,
}

/// Checks the components of a command.
///
/// NaN is never accepted. Unitless commands must lie in \[-1, 1\].
pub fn validate_command<'a, I: IntoIterator<Item = &'a f64>>(
    components: I,
    command_in_type: CommandInType,
) -> Result<(), CommandRejection> {
    let mut out_of_range = false;
    for &component in components {
        if component.is_nan() {
            return Err(CommandRejection::NotANumber);
        }
        if command_in_type == CommandInType::Unitless && component.abs() > 1. {
            out_of_range = true;
        }
    }
    if out_of_range {
        Err(CommandRejection::OutOfUnitRange)
    } else {
        Ok(())
    }
}

/// Zeroes every axis whose control flag is false.
pub fn enforce_control_dimensions(
    twist: &CartesianVector,
    control_dimensions: &[bool; TASK_DIMENSIONS],
) -> CartesianVector {
    CartesianVector::from_fn(|i, _| if control_dimensions[i] { twist[i] } else { 0. })
}

/// Converts a twist into the Cartesian increment of one cycle.
pub fn scale_cartesian_command(
    twist: &CartesianVector,
    parameters: &ServoParameters,
) -> CartesianVector {
    let period = parameters.publish_period;
    match parameters.command_in_type {
        CommandInType::Unitless => CartesianVector::from_fn(|i, _| {
            let scale = if i < 3 {
                parameters.linear_scale
            } else {
                parameters.rotational_scale
            };
            scale * period * twist[i]
        }),
        CommandInType::SpeedUnits => twist * period,
    }
}

/// Converts a joint jog command into the joint increment of one cycle.
/// # Return
/// The increment in group order and the names of the commanded joints outside of the group.
/// Those are skipped.
pub fn scale_joint_command(
    command: &JointJogCommand,
    joints: &JointSet,
    parameters: &ServoParameters,
) -> (JointVector, Vec<String>) {
    let mut result = JointVector::zeros(joints.len());
    let mut unknown = Vec::new();
    let scale = match parameters.command_in_type {
        CommandInType::Unitless => parameters.joint_scale * parameters.publish_period,
        CommandInType::SpeedUnits => parameters.publish_period,
    };
    for (name, velocity) in command.joint_names.iter().zip(command.velocities.iter()) {
        match joints.index(name) {
            Some(c) => result[c] = velocity * scale,
            None => unknown.push(name.clone()),
        }
    }
    (result, unknown)
}

#[derive(Debug)]
struct LatestState {
    twist: Option<Arc<TwistCommand>>,
    twist_stamp: Duration,
    twist_non_zero: bool,
    joint_jog: Option<Arc<JointJogCommand>>,
    joint_jog_stamp: Duration,
    joint_jog_non_zero: bool,
    joint_state: Option<Arc<JointStateMessage>>,
    collision_velocity_scale: f64,
    drift_dimensions: [bool; TASK_DIMENSIONS],
    control_dimensions: [bool; TASK_DIMENSIONS],
    paused: bool,
    waiting_for_command: bool,
    command_frame_transform: Option<Isometry3<f64>>,
}

/// Consistent copy of the shared state taken at the start of a cycle.
#[derive(Debug, Clone)]
pub struct InputSnapshot {
    pub twist: Option<Arc<TwistCommand>>,
    /// Stamp of the latest stamped twist, [`Duration::ZERO`] if none arrived yet.
    pub twist_stamp: Duration,
    pub twist_non_zero: bool,
    pub joint_jog: Option<Arc<JointJogCommand>>,
    /// Stamp of the latest stamped joint command, [`Duration::ZERO`] if none arrived yet.
    pub joint_jog_stamp: Duration,
    pub joint_jog_non_zero: bool,
    pub joint_state: Option<Arc<JointStateMessage>>,
    pub collision_velocity_scale: f64,
    pub drift_dimensions: [bool; TASK_DIMENSIONS],
    pub control_dimensions: [bool; TASK_DIMENSIONS],
    pub paused: bool,
}

/// Handle for feeding commands and measurements into a running servo loop.
///
/// Cheap to clone; all clones write to the same shared state. Every method only holds the
/// internal lock for a copy.
#[derive(Debug, Clone)]
pub struct ServoInput {
    latest: Arc<Mutex<LatestState>>,
}

impl ServoInput {
    pub(crate) fn new(parameters: &ServoParameters) -> Self {
        ServoInput {
            latest: Arc::new(Mutex::new(LatestState {
                twist: None,
                twist_stamp: Duration::ZERO,
                twist_non_zero: false,
                joint_jog: None,
                joint_jog_stamp: Duration::ZERO,
                joint_jog_non_zero: false,
                joint_state: None,
                collision_velocity_scale: 1.,
                drift_dimensions: parameters.drift_dimensions,
                control_dimensions: parameters.control_dimensions,
                paused: false,
                waiting_for_command: true,
                command_frame_transform: None,
            })),
        }
    }

    /// Stores a new Cartesian command, replacing the previous one.
    ///
    /// The staleness clock is only restarted by stamped commands.
    pub fn twist_command(&self, command: TwistCommand) {
        let non_zero = command.is_non_zero();
        let stamp = command.stamp;
        let command = Arc::new(command);
        let mut latest = self.latest.lock();
        latest.twist = Some(command);
        latest.twist_non_zero = non_zero;
        if stamp != Duration::ZERO {
            latest.twist_stamp = stamp;
        }
    }

    /// Stores a new joint command, replacing the previous one.
    ///
    /// The staleness clock is only restarted by stamped commands.
    pub fn joint_jog_command(&self, command: JointJogCommand) {
        let non_zero = command.is_non_zero();
        let stamp = command.stamp;
        let command = Arc::new(command);
        let mut latest = self.latest.lock();
        latest.joint_jog = Some(command);
        latest.joint_jog_non_zero = non_zero;
        if stamp != Duration::ZERO {
            latest.joint_jog_stamp = stamp;
        }
    }

    /// Stores a new measured joint state.
    pub fn joint_state(&self, message: JointStateMessage) {
        let message = Arc::new(message);
        self.latest.lock().joint_state = Some(message);
    }

    /// Sets the velocity scale reported by the collision checker.
    ///
    /// Values are clamped into \[0, 1\]. NaN is ignored.
    pub fn collision_velocity_scale(&self, scale: f64) {
        if scale.is_nan() {
            warn!("Ignoring NaN collision velocity scale");
            return;
        }
        self.latest.lock().collision_velocity_scale = scale.max(0.).min(1.);
    }

    /// Replaces the drift dimensions `[x, y, z, roll, pitch, yaw]`.
    pub fn change_drift_dimensions(&self, drift_dimensions: [bool; TASK_DIMENSIONS]) {
        self.latest.lock().drift_dimensions = drift_dimensions;
    }

    /// Replaces the control dimensions `[x, y, z, roll, pitch, yaw]`.
    pub fn change_control_dimensions(&self, control_dimensions: [bool; TASK_DIMENSIONS]) {
        self.latest.lock().control_dimensions = control_dimensions;
    }

    /// Latest measured joint state, `None` before the first one arrived.
    pub fn latest_joint_state(&self) -> Option<Arc<JointStateMessage>> {
        self.latest.lock().joint_state.clone()
    }

    /// Cached transform from the planning frame to the robot link command frame.
    ///
    /// `None` until a cycle computed it.
    pub fn command_frame_transform(&self) -> Option<Isometry3<f64>> {
        self.latest.lock().command_frame_transform
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.latest.lock().paused = paused;
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.latest.lock().paused
    }

    pub(crate) fn set_waiting_for_command(&self, waiting: bool) {
        self.latest.lock().waiting_for_command = waiting;
    }

    pub(crate) fn is_waiting_for_command(&self) -> bool {
        self.latest.lock().waiting_for_command
    }

    pub(crate) fn set_command_frame_transform(&self, transform: Isometry3<f64>) {
        self.latest.lock().command_frame_transform = Some(transform);
    }

    pub(crate) fn snapshot(&self) -> InputSnapshot {
        let latest = self.latest.lock();
        InputSnapshot {
            twist: latest.twist.clone(),
            twist_stamp: latest.twist_stamp,
            twist_non_zero: latest.twist_non_zero,
            joint_jog: latest.joint_jog.clone(),
            joint_jog_stamp: latest.joint_jog_stamp,
            joint_jog_non_zero: latest.joint_jog_non_zero,
            joint_state: latest.joint_state.clone(),
            collision_velocity_scale: latest.collision_velocity_scale,
            drift_dimensions: latest.drift_dimensions,
            control_dimensions: latest.control_dimensions,
            paused: latest.paused,
        }
    }
}
