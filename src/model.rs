// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the interface to the kinematic model of the servoed joint group.
//!
//! The model itself (robot description, forward kinematics and Jacobian evaluation) lives outside
//! of this crate. The servo loop only calls into it through [`KinematicModel`].
use nalgebra::{DMatrix, Isometry3};

use crate::utils::JointVector;

/// Lower and upper value of a bounded joint variable.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Limit {
    pub min: f64,
    pub max: f64,
}

impl Limit {
    pub fn new(min: f64, max: f64) -> Self {
        Limit { min, max }
    }
    /// A limit of `[-bound, bound]`.
    pub fn symmetric(bound: f64) -> Self {
        Limit {
            min: -bound.abs(),
            max: bound.abs(),
        }
    }
}

/// Position, velocity and acceleration bounds of a single joint.
///
/// Some joints do not declare all of their bounds. A `None` entry leaves that quantity
/// unconstrained.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct VariableBounds {
    /// Joint position limits in \[rad\] or \[m\].
    pub position: Option<Limit>,
    /// Joint velocity limits in \[rad/s\] or \[m/s\].
    pub velocity: Option<Limit>,
    /// Joint acceleration limits in \[rad/s²\] or \[m/s²\].
    pub acceleration: Option<Limit>,
}

impl VariableBounds {
    /// Bounds with nothing declared.
    pub fn unbounded() -> Self {
        VariableBounds::default()
    }
}

/// Kinematic model of the servoed joint group.
///
/// All joint vectors are ordered like [`joint_names`](`Self::joint_names`).
#[cfg_attr(test, mockall::automock)]
pub trait KinematicModel: Send {
    /// Names of the active joints of the group, in group order.
    fn joint_names(&self) -> Vec<String>;

    /// Bounds of a joint of the group. `None` if the joint is unknown to the model.
    fn joint_bounds(&self, joint_name: &str) -> Option<VariableBounds>;

    /// Calculates the 6xN Jacobian of the group tip in the planning frame.
    ///
    /// Rows are ordered `[x, y, z, roll, pitch, yaw]`, columns like the group joints.
    fn jacobian(&self, joint_positions: &JointVector) -> DMatrix<f64>;

    /// Pose of a link in the model root frame. `None` if the link is unknown.
    fn link_transform(&self, link_name: &str, joint_positions: &JointVector)
        -> Option<Isometry3<f64>>;
}

/// Calculates the pose of `target_frame` expressed in `base_frame`.
///
/// Solves `base -> root -> target` as `(root->base)^-1 * (root->target)`.
pub fn relative_transform<M: KinematicModel + ?Sized>(
    model: &M,
    joint_positions: &JointVector,
    base_frame: &str,
    target_frame: &str,
) -> Option<Isometry3<f64>> {
    let base = model.link_transform(base_frame, joint_positions)?;
    let target = model.link_transform(target_frame, joint_positions)?;
    Some(base.inverse() * target)
}
