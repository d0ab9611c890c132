// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the differential kinematics mapping Cartesian increments to joint increments.
use std::cmp::Ordering;

use nalgebra::{DMatrix, DVector, Isometry3, Vector3, SVD};

use crate::utils::CartesianVector;

/// Number of task space dimensions `[x, y, z, roll, pitch, yaw]`.
pub const TASK_DIMENSIONS: usize = 6;

/// Removes one task dimension from a Jacobian and the matching Cartesian increment.
///
/// The remaining rows keep their order.
pub fn remove_dimension(
    jacobian: DMatrix<f64>,
    delta_x: DVector<f64>,
    row_to_remove: usize,
) -> (DMatrix<f64>, DVector<f64>) {
    (
        jacobian.remove_row(row_to_remove),
        delta_x.remove_row(row_to_remove),
    )
}

/// Removes the rows of every drift dimension to take advantage of task redundancy.
///
/// Works from the last dimension backwards so the indices of the remaining ones stay valid.
/// The last remaining row is never removed.
/// # Arguments
/// * `jacobian` - Jacobian with one row per task dimension.
/// * `delta_x` - Cartesian increment, one entry per Jacobian row.
/// * `drift_dimensions` - `true` allows drift in that dimension.
pub fn remove_drift_dimensions(
    jacobian: DMatrix<f64>,
    delta_x: DVector<f64>,
    drift_dimensions: &[bool; TASK_DIMENSIONS],
) -> (DMatrix<f64>, DVector<f64>) {
    let mut jacobian = jacobian;
    let mut delta_x = delta_x;
    for dimension in (0..jacobian.nrows().min(TASK_DIMENSIONS)).rev() {
        if drift_dimensions[dimension] && jacobian.nrows() > 1 {
            let (reduced_jacobian, reduced_delta_x) =
                remove_dimension(jacobian, delta_x, dimension);
            jacobian = reduced_jacobian;
            delta_x = reduced_delta_x;
        }
    }
    (jacobian, delta_x)
}

/// Thin singular value decomposition `J = U * S * V^T` with singular values in descending order.
#[derive(Debug, Clone)]
pub struct ThinSvd {
    /// Left singular vectors, one column per singular value.
    pub u: DMatrix<f64>,
    /// Singular values, largest first.
    pub singular_values: DVector<f64>,
    /// Transposed right singular vectors, one row per singular value.
    pub v_t: DMatrix<f64>,
}

impl ThinSvd {
    /// Decomposes `matrix`. Returns `None` if the decomposition does not converge or the matrix
    /// is empty.
    pub fn new(matrix: &DMatrix<f64>) -> Option<Self> {
        if matrix.is_empty() {
            return None;
        }
        let svd = SVD::try_new(matrix.clone(), true, true, f64::EPSILON, 0)?;
        let u = svd.u?;
        let v_t = svd.v_t?;
        let values = svd.singular_values;

        let mut order: Vec<usize> = (0..values.len()).collect();
        order.sort_by(|&a, &b| {
            values[b]
                .partial_cmp(&values[a])
                .unwrap_or(Ordering::Equal)
        });
        Some(ThinSvd {
            u: DMatrix::from_fn(u.nrows(), order.len(), |r, c| u[(r, order[c])]),
            singular_values: DVector::from_fn(order.len(), |i, _| values[order[i]]),
            v_t: DMatrix::from_fn(order.len(), v_t.ncols(), |r, c| v_t[(order[r], c)]),
        })
    }

    /// Ratio of the largest to the smallest singular value.
    ///
    /// Infinite if the matrix is rank deficient.
    pub fn condition_number(&self) -> f64 {
        let largest = self.singular_values[0];
        let smallest = self.singular_values[self.singular_values.len() - 1];
        largest / smallest
    }

    /// Pseudo-inverse `V * S^-1 * U^T`.
    ///
    /// Nothing is clipped: a vanishing singular value produces a huge or infinite entry.
    pub fn pseudo_inverse(&self) -> DMatrix<f64> {
        let inverse_values = DMatrix::from_diagonal(&self.singular_values.map(|value| 1. / value));
        self.v_t.transpose() * inverse_values * self.u.transpose()
    }

    /// Left singular vector of the smallest singular value.
    pub fn last_left_singular_vector(&self) -> DVector<f64> {
        self.u.column(self.u.ncols() - 1).into_owned()
    }
}

/// Condition number of `matrix`, `None` if it cannot be decomposed.
pub fn condition_number(matrix: &DMatrix<f64>) -> Option<f64> {
    ThinSvd::new(matrix).map(|svd| svd.condition_number())
}

/// Rotates the linear and angular part of a Cartesian increment with the rotation of
/// `transform`. The translation is irrelevant for increments and is ignored.
pub fn rotate_cartesian_vector(
    transform: &Isometry3<f64>,
    vector: &CartesianVector,
) -> CartesianVector {
    let linear = transform.rotation * Vector3::new(vector[0], vector[1], vector[2]);
    let angular = transform.rotation * Vector3::new(vector[3], vector[4], vector[5]);
    CartesianVector::new(
        linear.x, linear.y, linear.z, angular.x, angular.y, angular.z,
    )
}
