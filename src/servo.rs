// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the servo::Servo type and the calculations of a single servo cycle.

pub mod command;
mod control_tools;
pub mod joint_state;
pub mod kinematics;
pub mod log_throttle;
pub mod low_pass_filter;
pub mod output;
pub mod parameters;
pub mod rate_limiting;
pub mod servo_calcs;
pub mod servo_loop;
pub mod singularity;
pub mod status;

pub use control_tools::{has_realtime_kernel, RealtimeConfig};
