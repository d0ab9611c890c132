// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains functions for limiting per-cycle joint increments to the velocity and acceleration
//! bounds of the joints, and for checking the position bounds.

use crate::model::VariableBounds;
use crate::utils::JointVector;

/// Returns the bound `value` violates, if any.
fn violated_bound(value: f64, min: f64, max: f64) -> Option<f64> {
    if value < min {
        Some(min)
    } else if value > max {
        Some(max)
    } else {
        None
    }
}

/// Scales the joint increment of one cycle so that the joint respects its acceleration and
/// velocity bounds.
///
/// The acceleration bound is applied first. The velocity bound is then checked on the already
/// limited increment. A limit is only applied if the adjustment factor is smaller than one in
/// magnitude; otherwise the increment is left as it is so it never gets amplified.
/// # Arguments
/// * `bounds` - Bounds of the joint. Undeclared bounds are not enforced.
/// * `previous_velocity` - Commanded joint velocity of the previous cycle.
/// * `delta` - Commanded joint increment of the current cycle.
/// * `period` - Cycle period in \[s\].
/// # Return
/// Limited joint increment.
pub fn limit_joint_increment(
    bounds: &VariableBounds,
    previous_velocity: f64,
    delta: f64,
    period: f64,
) -> f64 {
    let mut delta = delta;
    if let Some(acceleration_bounds) = bounds.acceleration {
        let velocity = delta / period;
        let acceleration = (velocity - previous_velocity) / period;
        if let Some(acceleration_limit) = violated_bound(
            acceleration,
            acceleration_bounds.min,
            acceleration_bounds.max,
        ) {
            // accel = (delta / period - previous_velocity) / period
            let relative_change =
                ((acceleration_limit * period + previous_velocity) * period) / delta;
            if relative_change.abs() < 1. {
                delta *= relative_change;
            }
        }
    }
    if let Some(velocity_bounds) = bounds.velocity {
        let velocity = delta / period;
        if let Some(velocity_limit) =
            violated_bound(velocity, velocity_bounds.min, velocity_bounds.max)
        {
            let relative_change = (velocity_limit * period) / delta;
            if relative_change.abs() < 1. {
                delta *= relative_change;
            }
        }
    }
    delta
}

/// Applies [`limit_joint_increment`] to every joint of the group.
///
/// `bounds`, `previous_velocities` and `delta` must have the same length.
pub fn limit_joint_increments(
    bounds: &[VariableBounds],
    previous_velocities: &JointVector,
    delta: &mut JointVector,
    period: f64,
) {
    for (i, joint_bounds) in bounds.iter().enumerate() {
        delta[i] = limit_joint_increment(joint_bounds, previous_velocities[i], delta[i], period);
    }
}

/// Finds the joints which are within `margin` of a position bound and still moving towards it.
/// # Arguments
/// * `bounds` - Bounds of every joint of the group.
/// * `positions` - Joint positions at the start of the cycle.
/// * `velocities` - Joint velocities used to decide the direction of motion.
/// * `margin` - Distance to the bound at which a joint is considered close.
/// # Return
/// Indices of the offending joints. Empty if no halt is needed.
pub fn joints_moving_past_position_limits(
    bounds: &[VariableBounds],
    positions: &JointVector,
    velocities: &JointVector,
    margin: f64,
) -> Vec<usize> {
    bounds
        .iter()
        .enumerate()
        .filter_map(|(i, joint_bounds)| {
            let limits = joint_bounds.position?;
            let position = positions[i];
            let velocity = velocities[i];
            let moving_past_lower = velocity < 0. && position < limits.min + margin;
            let moving_past_upper = velocity > 0. && position > limits.max - margin;
            if moving_past_lower || moving_past_upper {
                Some(i)
            } else {
                None
            }
        })
        .collect()
}

/// Calculates the time the slowest joint needs to stop at its acceleration bound.
///
/// Uses `min(|min_acceleration|, |max_acceleration|)` as the acceleration limit of a joint.
/// Joints without acceleration bounds are skipped.
/// # Return
/// The stop time in \[s\] and the indices of the joints without acceleration bounds.
pub fn worst_case_stop_time(
    bounds: &[VariableBounds],
    velocities: &JointVector,
) -> (f64, Vec<usize>) {
    let mut stop_time: f64 = 0.;
    let mut unbounded = Vec::new();
    for (i, joint_bounds) in bounds.iter().enumerate() {
        match joint_bounds.acceleration {
            Some(limits) => {
                let acceleration_limit = f64::min(limits.min.abs(), limits.max.abs());
                stop_time = stop_time.max((velocities[i] / acceleration_limit).abs());
            }
            None => unbounded.push(i),
        }
    }
    (stop_time, unbounded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Limit;

    const PERIOD: f64 = 0.01;

    fn acceleration_bounded(bound: f64) -> VariableBounds {
        VariableBounds {
            acceleration: Some(Limit::symmetric(bound)),
            ..VariableBounds::unbounded()
        }
    }

    fn velocity_bounded(bound: f64) -> VariableBounds {
        VariableBounds {
            velocity: Some(Limit::symmetric(bound)),
            ..VariableBounds::unbounded()
        }
    }

    #[test]
    fn acceleration_is_clipped_to_bound() {
        // 0.01 rad in 10 ms from rest is 100 rad/s^2
        let bounds = acceleration_bounded(10.);
        let limited = limit_joint_increment(&bounds, 0., 0.01, PERIOD);
        let acceleration = (limited / PERIOD - 0.) / PERIOD;
        assert!((acceleration - 10.).abs() < 1e-9);

        let limited = limit_joint_increment(&bounds, 0.5, 0.02, PERIOD);
        let acceleration = (limited / PERIOD - 0.5) / PERIOD;
        assert!((acceleration - 10.).abs() < 1e-9);

        let limited = limit_joint_increment(&bounds, 0., -0.01, PERIOD);
        let acceleration = (limited / PERIOD) / PERIOD;
        assert!((acceleration + 10.).abs() < 1e-9);
    }

    #[test]
    fn degenerate_acceleration_adjustment_keeps_delta() {
        // decelerating from 1 rad/s to 0.1 rad/s violates the bound but the matching
        // increment (0.009) is larger than the commanded one
        let bounds = acceleration_bounded(10.);
        assert_eq!(limit_joint_increment(&bounds, 1., 0.001, PERIOD), 0.001);
        // a zero increment cannot be scaled
        assert_eq!(limit_joint_increment(&bounds, 1., 0., PERIOD), 0.);
    }

    #[test]
    fn velocity_is_clipped_to_bound() {
        let bounds = velocity_bounded(1.);
        let limited = limit_joint_increment(&bounds, 0., 0.05, PERIOD);
        assert!((limited / PERIOD - 1.).abs() < 1e-9);
        let limited = limit_joint_increment(&bounds, 0., -0.05, PERIOD);
        assert!((limited / PERIOD + 1.).abs() < 1e-9);
        assert_eq!(limit_joint_increment(&bounds, 0., 0.005, PERIOD), 0.005);
    }

    #[test]
    fn velocity_is_checked_after_acceleration() {
        let bounds = VariableBounds {
            velocity: Some(Limit::symmetric(1.)),
            acceleration: Some(Limit::symmetric(50.)),
            ..VariableBounds::unbounded()
        };
        // acceleration limiting gives (50 * 0.01 + 0.9) * 0.01 = 0.014, velocity 1.4 rad/s
        let limited = limit_joint_increment(&bounds, 0.9, 0.05, PERIOD);
        assert!((limited - 0.01).abs() < 1e-12);
    }

    #[test]
    fn unbounded_joints_are_untouched() {
        let mut delta = JointVector::from_vec(vec![3., -3.]);
        limit_joint_increments(
            &[VariableBounds::unbounded(), velocity_bounded(1.)],
            &JointVector::zeros(2),
            &mut delta,
            PERIOD,
        );
        assert_eq!(delta[0], 3.);
        assert!((delta[1] + 0.01).abs() < 1e-12);
    }

    #[test]
    fn position_limit_halts_only_when_moving_outwards() {
        let bounds = vec![
            VariableBounds {
                position: Some(Limit::new(-1., 1.)),
                ..VariableBounds::unbounded()
            };
            4
        ];
        let positions = JointVector::from_vec(vec![0.95, 0.95, -0.95, 0.]);
        let velocities = JointVector::from_vec(vec![0.1, -0.1, -0.1, 1.]);
        assert_eq!(
            joints_moving_past_position_limits(&bounds, &positions, &velocities, 0.1),
            vec![0, 2]
        );
        assert!(
            joints_moving_past_position_limits(&bounds, &positions, &velocities, 0.01).is_empty()
        );
    }

    #[test]
    fn worst_case_stop_time_test() {
        let bounds = vec![
            VariableBounds {
                acceleration: Some(Limit::new(-2., 4.)),
                ..VariableBounds::unbounded()
            },
            acceleration_bounded(1.),
            VariableBounds::unbounded(),
        ];
        let velocities = JointVector::from_vec(vec![-1., 0.25, 100.]);
        let (stop_time, unbounded) = worst_case_stop_time(&bounds, &velocities);
        assert!((stop_time - 0.5).abs() < 1e-12);
        assert_eq!(unbounded, vec![2]);
    }
}
