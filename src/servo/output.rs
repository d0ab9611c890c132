// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the outgoing command types, their composition and the sink they are published to.
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::servo::joint_state::{JointSet, JointStateSnapshot};
use crate::servo::parameters::ServoParameters;
use crate::servo::status::StatusCode;
use crate::utils::JointVector;

/// Number of points an outgoing trajectory is padded to for simulators.
pub static GAZEBO_REDUNDANT_MESSAGE_COUNT: usize = 30;

/// One point of a [`JointTrajectory`]. Fields which are not published stay empty.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct JointTrajectoryPoint {
    pub positions: Vec<f64>,
    pub velocities: Vec<f64>,
    pub accelerations: Vec<f64>,
    pub time_from_start: Duration,
}

/// Outgoing joint command.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct JointTrajectory {
    /// Time the command was composed, on the servo clock.
    pub stamp: Duration,
    pub frame_id: String,
    pub joint_names: Vec<String>,
    pub points: Vec<JointTrajectoryPoint>,
}

/// Sink for everything the servo loop publishes.
///
/// Called from the cycle thread only. Implementations should return quickly, the cycle waits
/// for them.
pub trait ServoOutput: Send {
    /// Called once per cycle with the worst condition of the previous cycle.
    fn publish_status(&mut self, status: StatusCode);

    /// Called once per cycle with the time in \[s\] the slowest joint needs to stop.
    fn publish_worst_case_stop_time(&mut self, stop_time: f64);

    /// Called with the outgoing command if `command_out_type` is `joint_trajectory`.
    fn publish_trajectory(&mut self, trajectory: &JointTrajectory);

    /// Called with the outgoing command if `command_out_type` is `float64_multi_array`.
    fn publish_multiarray(&mut self, data: &[f64]);
}

/// Everything a [`RecordingOutput`] received.
#[derive(Debug, Clone, Default)]
pub struct Recording {
    pub statuses: Vec<StatusCode>,
    pub stop_times: Vec<f64>,
    pub trajectories: Vec<JointTrajectory>,
    pub multiarrays: Vec<Vec<f64>>,
}

/// [`ServoOutput`] which keeps every published value in memory.
///
/// Clones share the same recording, so a clone can be inspected while the original is owned by a
/// running servo loop.
#[derive(Debug, Clone, Default)]
pub struct RecordingOutput {
    recording: Arc<Mutex<Recording>>,
}

impl RecordingOutput {
    pub fn new() -> Self {
        RecordingOutput::default()
    }

    /// Copy of everything received so far.
    pub fn recording(&self) -> Recording {
        self.recording.lock().clone()
    }

    /// Most recent trajectory, if any.
    pub fn last_trajectory(&self) -> Option<JointTrajectory> {
        self.recording.lock().trajectories.last().cloned()
    }
}

impl ServoOutput for RecordingOutput {
    fn publish_status(&mut self, status: StatusCode) {
        self.recording.lock().statuses.push(status);
    }

    fn publish_worst_case_stop_time(&mut self, stop_time: f64) {
        self.recording.lock().stop_times.push(stop_time);
    }

    fn publish_trajectory(&mut self, trajectory: &JointTrajectory) {
        self.recording.lock().trajectories.push(trajectory.clone());
    }

    fn publish_multiarray(&mut self, data: &[f64]) {
        self.recording.lock().multiarrays.push(data.to_vec());
    }
}

/// Builds the one-point trajectory commanding `state`.
///
/// Only the fields selected by the `publish_joint_*` parameters are filled. Accelerations are
/// always zero.
pub fn compose_joint_trajectory(
    joints: &JointSet,
    state: &JointStateSnapshot,
    parameters: &ServoParameters,
    stamp: Duration,
) -> JointTrajectory {
    let mut point = JointTrajectoryPoint {
        time_from_start: parameters.period(),
        ..Default::default()
    };
    if parameters.publish_joint_positions {
        point.positions = state.position.iter().copied().collect();
    }
    if parameters.publish_joint_velocities {
        point.velocities = state.velocity.iter().copied().collect();
    }
    if parameters.publish_joint_accelerations {
        point.accelerations = vec![0.; joints.len()];
    }
    JointTrajectory {
        stamp,
        frame_id: parameters.planning_frame.clone(),
        joint_names: joints.names().to_vec(),
        points: vec![point],
    }
}

/// Builds the command holding `positions` at rest, used as the last sent command before the first
/// cycle.
pub fn initial_command(
    joints: &JointSet,
    positions: &JointVector,
    parameters: &ServoParameters,
    stamp: Duration,
) -> JointTrajectory {
    let state = JointStateSnapshot {
        position: positions.clone(),
        velocity: JointVector::zeros(joints.len()),
    };
    compose_joint_trajectory(joints, &state, parameters, stamp)
}

/// Replaces the first point of `trajectory` with a stop at `original`.
///
/// Positions are reset to the original positions and velocities to zero, for the fields which
/// are published. An empty trajectory gets a new point.
pub fn sudden_halt(
    trajectory: &mut JointTrajectory,
    original: &JointStateSnapshot,
    parameters: &ServoParameters,
) {
    let num_joints = original.position.len();
    if trajectory.points.is_empty() {
        trajectory.points.push(JointTrajectoryPoint {
            positions: vec![0.; num_joints],
            velocities: vec![0.; num_joints],
            time_from_start: parameters.period(),
            ..Default::default()
        });
    }
    let point = &mut trajectory.points[0];
    if parameters.publish_joint_positions {
        point.positions = original.position.iter().copied().collect();
    }
    if parameters.publish_joint_velocities {
        point.velocities = vec![0.; num_joints];
    }
}

/// Zeroes the velocities of every point, keeping everything else.
pub fn zero_velocities(trajectory: &mut JointTrajectory) {
    for point in trajectory.points.iter_mut() {
        point.velocities.iter_mut().for_each(|velocity| *velocity = 0.);
    }
}

/// Pads the trajectory to `count` points for simulators which drop points with past time stamps.
///
/// Point `i >= 2` is a copy of the first point at `i * period`. The second point stays a default
/// point. Nothing happens for `count < 2`.
pub fn insert_redundant_points(trajectory: &mut JointTrajectory, count: usize, period: f64) {
    if count < 2 || trajectory.points.is_empty() {
        return;
    }
    trajectory.points.resize(count, JointTrajectoryPoint::default());
    let mut point = trajectory.points[0].clone();
    for i in 2..count {
        point.time_from_start = Duration::from_secs_f64(i as f64 * period);
        trajectory.points[i] = point.clone();
    }
}

/// The flat array published in `float64_multi_array` mode: positions if they are published,
/// velocities otherwise.
pub fn multiarray_data(trajectory: &JointTrajectory, parameters: &ServoParameters) -> Vec<f64> {
    match trajectory.points.first() {
        Some(point) if parameters.publish_joint_positions => point.positions.clone(),
        Some(point) if parameters.publish_joint_velocities => point.velocities.clone(),
        _ => Vec::new(),
    }
}

/// Reads the first point of a trajectory back into group order.
///
/// Joints of the trajectory outside of the group are ignored. Missing fields read as zero.
/// # Return
/// `None` if the trajectory has no point or does not cover every joint of the group.
pub fn decompose(trajectory: &JointTrajectory, joints: &JointSet) -> Option<JointStateSnapshot> {
    let point = trajectory.points.first()?;
    let mut snapshot = JointStateSnapshot::zeros(joints.len());
    let mut covered = vec![false; joints.len()];
    for (m, name) in trajectory.joint_names.iter().enumerate() {
        if let Some(c) = joints.index(name) {
            snapshot.position[c] = point.positions.get(m).copied().unwrap_or(0.);
            snapshot.velocity[c] = point.velocities.get(m).copied().unwrap_or(0.);
            covered[c] = true;
        }
    }
    if covered.iter().all(|&joint_covered| joint_covered) {
        Some(snapshot)
    } else {
        None
    }
}
