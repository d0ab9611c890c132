// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the parameters of the servo loop and their validation.
//!
//! Parameters can be built in code, starting from [`ServoParameters::default`], or loaded from a
//! TOML file. Every field is optional in the file; missing fields keep their default value.
//! ```
//! # use servo::ServoParameters;
//! let parameters = ServoParameters::from_toml_str(
//!     r#"
//!     publish_period = 0.01
//!     command_in_type = "speed_units"
//!     drift_dimensions = [false, false, true, true, true, false]
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(parameters.publish_period, 0.01);
//! ```
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::exception::{create_config_exception, ServoException, ServoResult};

/// Units of incoming commands.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandInType {
    /// Components in \[-1, 1\], scaled by the `*_scale` parameters.
    Unitless,
    /// Components in \[m/s\] and \[rad/s\].
    SpeedUnits,
}

/// Shape of outgoing commands.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutType {
    /// A [`JointTrajectory`](`crate::JointTrajectory`) with one point.
    JointTrajectory,
    /// A flat array with either the positions or the velocities.
    Float64MultiArray,
}

/// Local constraint solver used by the local planner.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LocalSolverType {
    ForwardTrajectory,
    DecelerateBeforeCollision,
}

/// Gains of the per-joint PID controllers of the local constraint solvers.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
#[serde(default)]
pub struct PidConfig {
    pub k_p: f64,
    pub k_i: f64,
    pub k_d: f64,
    /// Bound of the integral term, applied as `[-windup_limit, windup_limit]`.
    pub windup_limit: f64,
}

impl Default for PidConfig {
    fn default() -> Self {
        PidConfig {
            k_p: 1.0,
            k_i: 0.0,
            k_d: 0.0,
            windup_limit: 0.1,
        }
    }
}

/// Parameters of the servo loop.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ServoParameters {
    /// Period of the servo loop in \[s\].
    pub publish_period: f64,
    /// Units of incoming Cartesian and joint commands.
    pub command_in_type: CommandInType,
    /// Max linear velocity in \[m/s\] for unitless commands.
    pub linear_scale: f64,
    /// Max angular velocity in \[rad/s\] for unitless commands.
    pub rotational_scale: f64,
    /// Max joint velocity in \[rad/s\] for unitless commands.
    pub joint_scale: f64,
    /// Shape of the outgoing command.
    pub command_out_type: CommandOutType,
    pub publish_joint_positions: bool,
    pub publish_joint_velocities: bool,
    /// Some controllers expect accelerations. They are always zero.
    pub publish_joint_accelerations: bool,
    /// Coefficient of the position low-pass filters. Larger is smoother but slower.
    pub low_pass_filter_coeff: f64,
    /// Commands older than this are treated as absent, in \[s\].
    pub incoming_command_timeout: f64,
    /// Number of halt commands published after all inputs went to zero. 0 publishes forever.
    pub num_outgoing_halt_msgs_to_publish: u32,
    /// Jacobian condition number at which deceleration starts.
    pub lower_singularity_threshold: f64,
    /// Jacobian condition number at which motion stops.
    pub hard_stop_singularity_threshold: f64,
    /// Distance to a position limit at which a joint moving outwards halts the group.
    pub joint_limit_margin: f64,
    /// Frame the Jacobian is expressed in.
    pub planning_frame: String,
    /// Default frame of incoming Cartesian commands.
    pub robot_link_command_frame: String,
    /// Pads outgoing trajectories with redundant points for simulators with strict timestamps.
    pub use_gazebo: bool,
    /// Initial drift dimensions `[x, y, z, roll, pitch, yaw]`.
    pub drift_dimensions: [bool; 6],
    /// Initial control dimensions `[x, y, z, roll, pitch, yaw]`.
    pub control_dimensions: [bool; 6],
    /// Window of throttled warnings in \[s\].
    pub log_throttle_period: f64,
    pub local_solver: LocalSolverType,
    pub pid: PidConfig,
}

impl Default for ServoParameters {
    fn default() -> Self {
        ServoParameters {
            publish_period: 0.034,
            command_in_type: CommandInType::Unitless,
            linear_scale: 0.4,
            rotational_scale: 0.8,
            joint_scale: 0.5,
            command_out_type: CommandOutType::JointTrajectory,
            publish_joint_positions: true,
            publish_joint_velocities: true,
            publish_joint_accelerations: false,
            low_pass_filter_coeff: 2.0,
            incoming_command_timeout: 0.1,
            num_outgoing_halt_msgs_to_publish: 4,
            lower_singularity_threshold: 17.0,
            hard_stop_singularity_threshold: 30.0,
            joint_limit_margin: 0.1,
            planning_frame: "base_link".to_string(),
            robot_link_command_frame: "base_link".to_string(),
            use_gazebo: false,
            drift_dimensions: [false; 6],
            control_dimensions: [true; 6],
            log_throttle_period: 30.0,
            local_solver: LocalSolverType::ForwardTrajectory,
            pid: PidConfig::default(),
        }
    }
}

impl ServoParameters {
    /// Parses and validates parameters from a TOML string.
    /// # Errors
    /// * ParseException if the string is not valid TOML for these parameters.
    /// * ConfigException if a value is out of range.
    pub fn from_toml_str(toml: &str) -> ServoResult<Self> {
        let parameters: ServoParameters =
            toml::from_str(toml).map_err(|e| ServoException::ParseException {
                message: e.to_string(),
            })?;
        parameters.validate()?;
        Ok(parameters)
    }

    /// Reads, parses and validates parameters from a TOML file.
    /// # Errors
    /// * IoException if the file cannot be read.
    /// * see [`from_toml_str`](`Self::from_toml_str`)
    pub fn from_file<P: AsRef<Path>>(path: P) -> ServoResult<Self> {
        let path = path.as_ref();
        let toml = std::fs::read_to_string(path).map_err(|source| ServoException::IoException {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&toml)
    }

    /// Period of the servo loop.
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(self.publish_period)
    }

    /// Age after which a command is stale.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.incoming_command_timeout)
    }

    /// Window of throttled warnings.
    pub fn log_throttle_window(&self) -> Duration {
        Duration::from_secs_f64(self.log_throttle_period)
    }

    /// Checks that the parameters are consistent.
    /// # Errors
    /// * ConfigException naming the first offending parameter.
    pub fn validate(&self) -> ServoResult<()> {
        if !(self.publish_period.is_finite() && self.publish_period > 0.) {
            return Err(create_config_exception(
                "'publish_period' should be greater than zero",
            ));
        }
        if !(self.incoming_command_timeout.is_finite() && self.incoming_command_timeout > 0.) {
            return Err(create_config_exception(
                "'incoming_command_timeout' should be greater than zero",
            ));
        }
        if !(self.lower_singularity_threshold >= 0. && self.hard_stop_singularity_threshold >= 0.)
        {
            return Err(create_config_exception(
                "'hard_stop_singularity_threshold' and 'lower_singularity_threshold' should be greater than zero",
            ));
        }
        if self.hard_stop_singularity_threshold < self.lower_singularity_threshold {
            return Err(create_config_exception(
                "'hard_stop_singularity_threshold' should be greater than 'lower_singularity_threshold'",
            ));
        }
        if !(self.low_pass_filter_coeff.is_finite() && self.low_pass_filter_coeff > 0.) {
            return Err(create_config_exception(
                "'low_pass_filter_coeff' should be greater than zero",
            ));
        }
        if !(self.joint_limit_margin.is_finite() && self.joint_limit_margin >= 0.) {
            return Err(create_config_exception(
                "'joint_limit_margin' should not be negative",
            ));
        }
        let scales = [self.linear_scale, self.rotational_scale, self.joint_scale];
        if scales.iter().any(|scale| !scale.is_finite()) {
            return Err(create_config_exception(
                "'linear_scale', 'rotational_scale' and 'joint_scale' should be finite",
            ));
        }
        if !self.publish_joint_positions
            && !self.publish_joint_velocities
            && !self.publish_joint_accelerations
        {
            return Err(create_config_exception(
                "at least one of 'publish_joint_positions', 'publish_joint_velocities' and 'publish_joint_accelerations' must be true",
            ));
        }
        if self.command_out_type == CommandOutType::Float64MultiArray
            && self.publish_joint_positions
            && self.publish_joint_velocities
        {
            return Err(create_config_exception(
                "when publishing a flat array, select positions OR velocities",
            ));
        }
        if !(self.log_throttle_period.is_finite() && self.log_throttle_period >= 0.) {
            return Err(create_config_exception(
                "'log_throttle_period' should not be negative",
            ));
        }
        let durations = [
            ("publish_period", self.publish_period),
            ("incoming_command_timeout", self.incoming_command_timeout),
            ("log_throttle_period", self.log_throttle_period),
        ];
        for (name, seconds) in durations.iter() {
            if Duration::try_from_secs_f64(*seconds).is_err() {
                return Err(create_config_exception(format!(
                    "'{}' is not a representable duration",
                    name
                )));
            }
        }
        if self.pid.windup_limit < 0. {
            return Err(create_config_exception(
                "'pid.windup_limit' should not be negative",
            ));
        }
        Ok(())
    }
}
