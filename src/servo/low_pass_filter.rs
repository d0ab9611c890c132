// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the low-pass filters smoothing the outgoing joint positions.

use crate::utils::JointVector;

/// Single-pole low-pass filter.
///
/// ```text
/// y[n] = (x[n] + x[n-1]) / (1 + c) - (1 - c) / (1 + c) * y[n-1]
/// ```
/// where `c` is the filter coefficient. A larger coefficient gives a smoother but slower
/// response. A constant input passes unchanged.
#[derive(Debug, Copy, Clone)]
pub struct LowPassFilter {
    previous_measurement: f64,
    previous_filtered_value: f64,
    scale_term: f64,
    feedback_term: f64,
}

impl LowPassFilter {
    /// Creates a new LowPassFilter with all history at zero.
    /// # Arguments
    /// * `filter_coeff` - Filter coefficient, must be greater than zero.
    pub fn new(filter_coeff: f64) -> Self {
        LowPassFilter {
            previous_measurement: 0.,
            previous_filtered_value: 0.,
            scale_term: 1. / (1. + filter_coeff),
            feedback_term: (1. - filter_coeff) / (1. + filter_coeff),
        }
    }

    /// Filters a new measurement and returns the filtered value.
    pub fn filter(&mut self, new_measurement: f64) -> f64 {
        let new_filtered_value = self.scale_term * (self.previous_measurement + new_measurement)
            - self.feedback_term * self.previous_filtered_value;
        self.previous_measurement = new_measurement;
        self.previous_filtered_value = new_filtered_value;
        new_filtered_value
    }

    /// Overwrites the history so that the filter rests at `value`.
    pub fn reset(&mut self, value: f64) {
        self.previous_measurement = value;
        self.previous_filtered_value = value;
    }
}

/// One [`LowPassFilter`] per joint of the group.
#[derive(Debug, Clone)]
pub struct FilterBank {
    filters: Vec<LowPassFilter>,
}

impl FilterBank {
    pub fn new(num_joints: usize, filter_coeff: f64) -> Self {
        FilterBank {
            filters: vec![LowPassFilter::new(filter_coeff); num_joints],
        }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Filters the position of joint `index`.
    pub fn filter(&mut self, index: usize, position: f64) -> f64 {
        self.filters[index].filter(position)
    }

    /// Resynchronizes every filter to the given positions, bypassing their history.
    pub fn reset(&mut self, positions: &JointVector) {
        self.filters
            .iter_mut()
            .zip(positions.iter())
            .for_each(|(filter, &position)| filter.reset(position));
    }
}
