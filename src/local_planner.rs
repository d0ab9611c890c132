// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the local constraint solvers which turn the next waypoints of a local trajectory
//! into a single joint command.
//!
//! The solver is chosen once with [`create_local_solver`] from
//! [`local_solver`](`crate::ServoParameters::local_solver`).
use std::time::Duration;

use crate::local_planner::decelerate_before_collision::DecelerateBeforeCollision;
use crate::servo::joint_state::{JointSet, JointStateMessage};
use crate::servo::output::{JointTrajectory, JointTrajectoryPoint};
use crate::servo::parameters::{LocalSolverType, ServoParameters};

pub mod decelerate_before_collision;
pub mod pid;

/// Result of one [`solve`](`LocalConstraintSolver::solve`) call.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalSolution {
    pub trajectory: JointTrajectory,
    /// Event for the caller, e.g. `"collision_ahead"`.
    pub feedback: Option<String>,
}

/// A per-cycle solver of the local planner.
pub trait LocalConstraintSolver: Send {
    /// Computes the command of this cycle.
    /// # Arguments
    /// * `local_trajectory` - Upcoming waypoints, the first one is the next target.
    /// * `current_state` - Measured state of the robot.
    /// * `path_is_valid` - false if the path ahead is blocked.
    /// * `stamp` - Stamp of the resulting trajectory.
    fn solve(
        &mut self,
        local_trajectory: &JointTrajectory,
        current_state: &JointStateMessage,
        path_is_valid: bool,
        stamp: Duration,
    ) -> LocalSolution;
}

/// Forwards the next waypoint of the local trajectory unchanged.
#[derive(Debug, Clone, Default)]
pub struct ForwardTrajectory;

impl LocalConstraintSolver for ForwardTrajectory {
    fn solve(
        &mut self,
        local_trajectory: &JointTrajectory,
        current_state: &JointStateMessage,
        _path_is_valid: bool,
        stamp: Duration,
    ) -> LocalSolution {
        let trajectory = match local_trajectory.points.first() {
            Some(point) => JointTrajectory {
                stamp,
                frame_id: local_trajectory.frame_id.clone(),
                joint_names: local_trajectory.joint_names.clone(),
                points: vec![point.clone()],
            },
            None => JointTrajectory {
                stamp,
                frame_id: local_trajectory.frame_id.clone(),
                joint_names: current_state.name.clone(),
                points: vec![JointTrajectoryPoint {
                    positions: current_state.position.clone(),
                    ..Default::default()
                }],
            },
        };
        LocalSolution {
            trajectory,
            feedback: None,
        }
    }
}

/// The set of available local constraint solvers.
#[derive(Debug, Clone)]
pub enum LocalSolver {
    ForwardTrajectory(ForwardTrajectory),
    DecelerateBeforeCollision(DecelerateBeforeCollision),
}

impl LocalConstraintSolver for LocalSolver {
    fn solve(
        &mut self,
        local_trajectory: &JointTrajectory,
        current_state: &JointStateMessage,
        path_is_valid: bool,
        stamp: Duration,
    ) -> LocalSolution {
        match self {
            LocalSolver::ForwardTrajectory(solver) => {
                solver.solve(local_trajectory, current_state, path_is_valid, stamp)
            }
            LocalSolver::DecelerateBeforeCollision(solver) => {
                solver.solve(local_trajectory, current_state, path_is_valid, stamp)
            }
        }
    }
}

/// Creates the solver selected in `parameters` for the joints of `joints`.
pub fn create_local_solver(parameters: &ServoParameters, joints: &JointSet) -> LocalSolver {
    match parameters.local_solver {
        LocalSolverType::ForwardTrajectory => LocalSolver::ForwardTrajectory(ForwardTrajectory),
        LocalSolverType::DecelerateBeforeCollision => LocalSolver::DecelerateBeforeCollision(
            DecelerateBeforeCollision::from_parameters(parameters, joints),
        ),
    }
}
