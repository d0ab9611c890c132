// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! # servo-rs
//! servo-rs is a library to jog robot arms in real time. It takes Cartesian twist commands or
//! joint velocity commands and turns them into a stream of smooth, limit-respecting joint
//! commands at a fixed rate.
//!
//! **ALWAYS HAVE THE USER STOP BUTTON AT
//! HAND WHILE SERVOING THE ROBOT!**
//!
//!
//! ## Design
//! Every cycle the servo loop reads the latest command and joint state, maps a twist into joint
//! space through the pseudo-inverse of the Jacobian, slows down near singularities, applies
//! acceleration and velocity limits, filters the positions and publishes the result. Commands
//! which would move a joint past its position limit are replaced by a halt.
//!
//! The library is divided into two main Modules:
//! * [servo](`crate::servo`) - contains the servo loop and everything it calculates per cycle.
//! * [local_planner](`crate::local_planner`) - contains the local constraint solvers.
//!
//! The robot is described by a [`KinematicModel`] and the commands leave through a
//! [`ServoOutput`].
//!
//! # Example:
//!```no_run
//! use std::time::Duration;
//! use nalgebra::Vector3;
//! use servo::{
//!     JointStateMessage, KinematicModel, RecordingOutput, Servo, ServoParameters, ServoResult,
//!     TwistCommand,
//! };
//! fn run<M: KinematicModel + 'static>(model: M) -> ServoResult<()> {
//!     let parameters = ServoParameters::from_file("servo.toml")?;
//!     let output = RecordingOutput::new();
//!     let mut servo = Servo::new(parameters, model, output.clone(), None)?;
//!     let input = servo.input();
//!     input.joint_state(JointStateMessage::new(
//!         vec!["shoulder".into(), "elbow".into()],
//!         vec![0.1, 0.2],
//!         vec![0., 0.],
//!     ));
//!     servo.start()?;
//!     input.twist_command(TwistCommand::new(
//!         Vector3::new(0.1, 0., 0.),
//!         Vector3::zeros(),
//!         "base",
//!         Duration::ZERO,
//!     ));
//!     std::thread::sleep(Duration::from_secs(1));
//!     servo.stop()
//! }
//! ```
//!
//! The main function returns a ServoResult<()> which means that it returns either Ok(())
//! or an Error of type ServoException. Problems inside a running cycle are not errors, they are
//! reported through the published [`StatusCode`].
pub mod exception;
pub mod local_planner;
pub mod model;
pub mod servo;
pub mod utils;

pub use exception::{ServoException, ServoResult};
pub use local_planner::{
    create_local_solver, ForwardTrajectory, LocalConstraintSolver, LocalSolution, LocalSolver,
};
pub use model::{KinematicModel, Limit, VariableBounds};
pub use servo::command::{JointJogCommand, ServoInput, TwistCommand};
pub use servo::joint_state::{JointSet, JointStateMessage, JointStateSnapshot};
pub use servo::log_throttle::LogThrottle;
pub use servo::output::{
    JointTrajectory, JointTrajectoryPoint, Recording, RecordingOutput, ServoOutput,
};
pub use servo::parameters::{
    CommandInType, CommandOutType, LocalSolverType, PidConfig, ServoParameters,
};
pub use servo::servo_calcs::{CycleOutcome, ServoCalcs, ServoState};
pub use servo::servo_loop::Servo;
pub use servo::status::StatusCode;
pub use servo::RealtimeConfig;
pub use utils::*;
