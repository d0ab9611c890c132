// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the per-joint PID controller of the local constraint solvers.
//!
//! ```text
//! output = k_p * e + clamp(k_i * ∫e dt, -windup_limit, windup_limit) + k_d * de/dt
//! ```
use tracing::warn;

use crate::servo::parameters::PidConfig;

/// PID controller for a single joint position.
#[derive(Debug, Clone)]
pub struct Pid {
    config: PidConfig,
    integral: f64,
    last_error: f64,
}

impl Pid {
    pub fn new(config: PidConfig) -> Self {
        Pid {
            config,
            integral: 0.,
            last_error: 0.,
        }
    }

    /// Computes the command for the current error.
    ///
    /// The integral is kept such that the integral term stays within the windup limit.
    /// # Arguments
    /// * `error` - Target minus current position.
    /// * `dt` - Time since the last call in \[s\]. Zero, negative or NaN gives a zero command.
    pub fn compute_command(&mut self, error: f64, dt: f64) -> f64 {
        if !(dt > 0.) || !error.is_finite() {
            warn!(
                "PID received dt = {} and error = {}, returning zero output",
                dt, error
            );
            return 0.;
        }
        let p_term = self.config.k_p * error;

        self.integral += error * dt;
        let limit = self.config.windup_limit;
        let mut i_term = self.config.k_i * self.integral;
        if i_term.abs() > limit {
            i_term = i_term.max(-limit).min(limit);
            self.integral = i_term / self.config.k_i;
        }

        let d_term = self.config.k_d * (error - self.last_error) / dt;
        self.last_error = error;

        p_term + i_term + d_term
    }
}
