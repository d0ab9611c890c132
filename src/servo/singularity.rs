// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the velocity scaling close to kinematic singularities.
use nalgebra::{DMatrix, DVector};

use crate::model::KinematicModel;
use crate::servo::kinematics::{condition_number, ThinSvd};
use crate::servo::status::StatusCode;
use crate::utils::JointVector;

/// Scale applied to the singular vector when probing which way the singularity lies.
pub static SINGULARITY_PROBE_SCALE: f64 = 100.;

/// Jacobian condition numbers at which the servo decelerates and stops.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SingularityThresholds {
    /// Deceleration starts above this condition number.
    pub lower: f64,
    /// Motion stops at and above this condition number.
    pub hard_stop: f64,
}

/// Calculates a velocity scale from the proximity to a singularity and the commanded direction.
///
/// The last left singular vector of the Jacobian points directly toward or away from the nearest
/// singularity, but its sign is arbitrary. To resolve it, the joints are moved a small step along
/// that vector and the condition number of the full Jacobian is recomputed at the new pose: if
/// it is not larger than the current one, the vector points away from the singularity and is
/// flipped.
///
/// Only motion heading toward the singularity is restricted. Between the lower and the hard stop
/// threshold the scale ramps linearly from 1 to 0.
/// # Arguments
/// * `model` - Kinematic model, evaluated once more at the probe pose.
/// * `joint_positions` - Joint positions the Jacobian was evaluated at.
/// * `commanded_delta` - Cartesian increment with the drift dimensions removed.
/// * `svd` - Decomposition of the reduced Jacobian.
/// * `pseudo_inverse` - Pseudo-inverse of the reduced Jacobian.
/// * `thresholds` - Condition number thresholds.
/// # Return
/// Velocity scale in \[0, 1\] and the matching status.
pub fn velocity_scaling_factor_for_singularity<M: KinematicModel + ?Sized>(
    model: &M,
    joint_positions: &JointVector,
    commanded_delta: &DVector<f64>,
    svd: &ThinSvd,
    pseudo_inverse: &DMatrix<f64>,
    thresholds: &SingularityThresholds,
) -> (f64, StatusCode) {
    let mut vector_toward_singularity = svd.last_left_singular_vector();
    let ini_condition = svd.condition_number();

    let probe_delta_x = &vector_toward_singularity / SINGULARITY_PROBE_SCALE;
    let probe_positions = joint_positions + pseudo_inverse * probe_delta_x;
    if let Some(new_condition) = condition_number(&model.jacobian(&probe_positions)) {
        if ini_condition >= new_condition {
            vector_toward_singularity *= -1.;
        }
    }

    if vector_toward_singularity.dot(commanded_delta) > 0. {
        if ini_condition >= thresholds.hard_stop {
            return (0., StatusCode::HaltForSingularity);
        }
        if ini_condition > thresholds.lower {
            let scale = 1.
                - (ini_condition - thresholds.lower) / (thresholds.hard_stop - thresholds.lower);
            return (scale, StatusCode::DecelerateForSingularity);
        }
    }
    (1., StatusCode::Ok)
}
