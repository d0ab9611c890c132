// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains a local constraint solver which stops the robot smoothly once the path ahead is
//! blocked.
use std::time::Duration;

use tracing::{debug, info};

use crate::local_planner::pid::Pid;
use crate::local_planner::{LocalConstraintSolver, LocalSolution};
use crate::servo::joint_state::{JointSet, JointStateMessage};
use crate::servo::output::{JointTrajectory, JointTrajectoryPoint};
use crate::servo::parameters::{PidConfig, ServoParameters};

/// Feedback emitted once when the path becomes invalid.
pub static COLLISION_AHEAD_FEEDBACK: &str = "collision_ahead";

/// Tracks the next waypoint with one PID per joint and holds the current state while the path
/// is invalid.
#[derive(Debug, Clone)]
pub struct DecelerateBeforeCollision {
    joints: JointSet,
    controllers: Vec<Pid>,
    period: Duration,
    feedback_sent: bool,
}

impl DecelerateBeforeCollision {
    pub fn new(joints: JointSet, pid: PidConfig, period: Duration) -> Self {
        let controllers = vec![Pid::new(pid); joints.len()];
        DecelerateBeforeCollision {
            joints,
            controllers,
            period,
            feedback_sent: false,
        }
    }

    pub fn from_parameters(parameters: &ServoParameters, joints: &JointSet) -> Self {
        Self::new(joints.clone(), parameters.pid, parameters.period())
    }
}

impl LocalConstraintSolver for DecelerateBeforeCollision {
    fn solve(
        &mut self,
        local_trajectory: &JointTrajectory,
        current_state: &JointStateMessage,
        path_is_valid: bool,
        stamp: Duration,
    ) -> LocalSolution {
        let mut feedback = None;
        let target = if path_is_valid {
            self.feedback_sent = false;
            local_trajectory.points.first().map(|point| {
                (local_trajectory.joint_names.as_slice(), point.positions.as_slice())
            })
        } else {
            if !self.feedback_sent {
                info!("Collision ahead, holding the current state");
                feedback = Some(COLLISION_AHEAD_FEEDBACK.to_string());
                self.feedback_sent = true;
            }
            None
        };
        let target = target.unwrap_or((
            current_state.name.as_slice(),
            current_state.position.as_slice(),
        ));

        let dt = self.period.as_secs_f64();
        let mut joint_names = Vec::new();
        let mut positions = Vec::new();
        for (name, &target_position) in target.0.iter().zip(target.1.iter()) {
            let c = match self.joints.index(name) {
                Some(c) => c,
                None => {
                    debug!("Skipping joint {} which is not part of the group", name);
                    continue;
                }
            };
            let current = match current_state.name.iter().position(|n| n == name) {
                Some(m) => match current_state.position.get(m) {
                    Some(&position) => position,
                    None => continue,
                },
                None => {
                    debug!("Skipping joint {} without a measured position", name);
                    continue;
                }
            };
            let delta = self.controllers[c].compute_command(target_position - current, dt);
            joint_names.push(name.clone());
            positions.push(current + delta);
        }

        LocalSolution {
            trajectory: JointTrajectory {
                stamp,
                frame_id: local_trajectory.frame_id.clone(),
                joint_names,
                points: vec![JointTrajectoryPoint {
                    positions,
                    time_from_start: self.period,
                    ..Default::default()
                }],
            },
            feedback,
        }
    }
}
