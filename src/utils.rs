// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! contains useful type definitions, clocks and conversion functions.
use nalgebra::{DVector, Vector3, Vector6};
use parking_lot::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A Cartesian delta or twist ordered as `[x, y, z, roll, pitch, yaw]`.
pub type CartesianVector = Vector6<f64>;
/// A per-joint vector ordered like the controlled [`JointSet`](`crate::JointSet`).
pub type JointVector = DVector<f64>;

/// Stacks a linear and an angular part into one 6-vector.
pub fn stack_twist(linear: &Vector3<f64>, angular: &Vector3<f64>) -> CartesianVector {
    Vector6::new(
        linear.x, linear.y, linear.z, angular.x, angular.y, angular.z,
    )
}

/// Source of the time stamps used for command staleness.
///
/// Commands have to be stamped on the same clock the servo loop is using.
/// A time of [`Duration::ZERO`] means "no time stamp".
pub trait Clock: Send + Sync {
    /// Current time since the epoch of this clock.
    fn now(&self) -> Duration;
}

/// Wall clock measuring the time since the UNIX epoch.
#[derive(Debug, Default, Copy, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }
}

/// A clock which only moves when told to. Useful for simulation and testing.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    /// Creates a new ManualClock starting at `start`.
    pub fn new(start: Duration) -> Self {
        ManualClock {
            now: Mutex::new(start),
        }
    }
    /// Moves the clock forward by `step`.
    pub fn advance(&self, step: Duration) {
        *self.now.lock() += step;
    }
    /// Sets the clock to an absolute time.
    pub fn set(&self, now: Duration) {
        *self.now.lock() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}
