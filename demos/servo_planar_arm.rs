// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use nalgebra::{DMatrix, Isometry3, Translation3, UnitQuaternion, Vector3};
use tracing::info;

use servo::{
    Clock, JointStateMessage, JointVector, KinematicModel, Limit, RecordingOutput, Servo,
    ServoParameters, ServoResult, SystemClock, TwistCommand, VariableBounds,
};

/// An example servoing a simulated planar arm with three revolute joints.
///
/// The measured joint state is taken from the last published command, so the arm follows its
/// commands perfectly.
#[derive(Parser, Debug)]
#[clap(author, version, name = "servo_planar_arm")]
struct CommandLineArguments {
    /// Linear x velocity of the tool in the base frame, in [-1, 1]
    #[clap(long, default_value_t = 0.5, allow_hyphen_values = true)]
    pub x: f64,
    /// Linear y velocity of the tool in the base frame, in [-1, 1]
    #[clap(long, default_value_t = 0., allow_hyphen_values = true)]
    pub y: f64,
    /// Duration of the motion in seconds
    #[clap(short, long, default_value_t = 2.)]
    pub duration: f64,
    /// Optional TOML file with servo parameters
    #[clap(short, long)]
    pub parameters: Option<String>,
}

const LINK_LENGTHS: [f64; 3] = [0.4, 0.3, 0.1];

struct PlanarArm;

impl PlanarArm {
    fn link_angles(q: &JointVector) -> [f64; 3] {
        [q[0], q[0] + q[1], q[0] + q[1] + q[2]]
    }
}

impl KinematicModel for PlanarArm {
    fn joint_names(&self) -> Vec<String> {
        vec!["joint1".into(), "joint2".into(), "joint3".into()]
    }

    fn joint_bounds(&self, _joint_name: &str) -> Option<VariableBounds> {
        Some(VariableBounds {
            position: Some(Limit::symmetric(2.8)),
            velocity: Some(Limit::symmetric(2.)),
            acceleration: None,
        })
    }

    fn jacobian(&self, q: &JointVector) -> DMatrix<f64> {
        let angles = PlanarArm::link_angles(q);
        let mut jacobian = DMatrix::zeros(6, 3);
        for column in 0..3 {
            for (length, angle) in LINK_LENGTHS.iter().zip(angles.iter()).skip(column) {
                jacobian[(0, column)] -= length * angle.sin();
                jacobian[(1, column)] += length * angle.cos();
            }
            jacobian[(5, column)] = 1.;
        }
        jacobian
    }

    fn link_transform(&self, link_name: &str, q: &JointVector) -> Option<Isometry3<f64>> {
        match link_name {
            "base" => Some(Isometry3::identity()),
            "tool" => {
                let angles = PlanarArm::link_angles(q);
                let mut x = 0.;
                let mut y = 0.;
                for (length, angle) in LINK_LENGTHS.iter().zip(angles.iter()) {
                    x += length * angle.cos();
                    y += length * angle.sin();
                }
                Some(Isometry3::from_parts(
                    Translation3::new(x, y, 0.),
                    UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angles[2]),
                ))
            }
            _ => None,
        }
    }
}

fn main() -> ServoResult<()> {
    tracing_subscriber::fmt::init();
    let args = CommandLineArguments::parse();
    let mut parameters = match &args.parameters {
        Some(path) => ServoParameters::from_file(path)?,
        None => ServoParameters::default(),
    };
    parameters.planning_frame = "base".into();
    parameters.robot_link_command_frame = "base".into();
    parameters.publish_period = 0.01;
    // the arm cannot move along z, roll or pitch
    parameters.drift_dimensions = [false, false, true, true, true, false];

    let output = RecordingOutput::new();
    let clock = Arc::new(SystemClock);
    let mut servo = Servo::with_clock(parameters, PlanarArm, output.clone(), clock.clone(), None)?;
    let input = servo.input();
    let names = PlanarArm.joint_names();
    input.joint_state(JointStateMessage::new(
        names.clone(),
        vec![0.3, 0.6, 0.4],
        vec![0.; 3],
    ));
    servo.start()?;

    let start = Instant::now();
    while start.elapsed() < Duration::from_secs_f64(args.duration) {
        input.twist_command(TwistCommand::new(
            Vector3::new(args.x, args.y, 0.),
            Vector3::zeros(),
            "base",
            clock.now(),
        ));
        if let Some(point) = output
            .last_trajectory()
            .and_then(|trajectory| trajectory.points.first().cloned())
        {
            input.joint_state(JointStateMessage::new(
                names.clone(),
                point.positions,
                point.velocities,
            ));
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    servo.stop()?;

    let recording = output.recording();
    info!(
        "published {} trajectories, last status {:?}",
        recording.trajectories.len(),
        recording.statuses.last()
    );
    if let Some(state) = input.latest_joint_state() {
        let q = JointVector::from_column_slice(&state.position);
        if let Some(tool) = PlanarArm.link_transform("tool", &q) {
            println!(
                "final joint positions {:?}, tool at x = {:.3}, y = {:.3}",
                state.position, tool.translation.x, tool.translation.y
            );
        }
    }
    Ok(())
}
