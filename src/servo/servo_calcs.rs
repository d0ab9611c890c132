// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the computation of a single servo cycle.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nalgebra::{DVector, Isometry3};
use tracing::{debug, error, warn};

use crate::exception::{create_config_exception, ServoResult};
use crate::model::{relative_transform, KinematicModel, VariableBounds};
use crate::servo::command::{
    enforce_control_dimensions, scale_cartesian_command, scale_joint_command, validate_command,
    CommandRejection, InputSnapshot, JointJogCommand, ServoInput, TwistCommand,
};
use crate::servo::joint_state::{JointSet, JointStateSnapshot, JointStateTracker};
use crate::servo::kinematics::{
    remove_drift_dimensions, rotate_cartesian_vector, ThinSvd, TASK_DIMENSIONS,
};
use crate::servo::log_throttle::LogThrottle;
use crate::servo::low_pass_filter::FilterBank;
use crate::servo::output::{
    compose_joint_trajectory, initial_command, insert_redundant_points, multiarray_data,
    sudden_halt, zero_velocities, JointTrajectory, ServoOutput, GAZEBO_REDUNDANT_MESSAGE_COUNT,
};
use crate::servo::parameters::{CommandOutType, ServoParameters};
use crate::servo::rate_limiting::{
    joints_moving_past_position_limits, limit_joint_increments, worst_case_stop_time,
};
use crate::servo::singularity::{velocity_scaling_factor_for_singularity, SingularityThresholds};
use crate::servo::status::StatusCode;
use crate::utils::{Clock, JointVector};

/// Sleep between two attempts to read a complete joint state.
pub static JOINT_STATE_RETRY_PERIOD: Duration = Duration::from_millis(10);

/// Lifecycle state of the servo loop.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ServoState {
    /// The cycle thread is not running.
    Stopped,
    /// Running, no stamped command has arrived since the start.
    WaitingForCommand,
    /// Running and servoing.
    Active,
    /// Running, only tracking the joint state.
    Paused,
}

/// What a single call of [`ServoCalcs::tick`] did.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A command was published.
    Published,
    /// The command was a repeated halt and publishing was skipped.
    Suppressed,
    /// Waiting for the first command or paused. Only the filters were updated.
    Idle,
    /// The command was invalid or could not be converted. Nothing was published.
    Aborted,
    /// A stop was requested while waiting for a complete joint state.
    Stopped,
}

/// State and computation of the servo cycle.
///
/// Owned by the cycle thread while the loop runs. Nothing in here is shared, the producers only
/// reach it through the [`ServoInput`] snapshot taken at the start of every cycle.
pub struct ServoCalcs<M: KinematicModel, O: ServoOutput> {
    parameters: ServoParameters,
    model: M,
    output: O,
    input: ServoInput,
    clock: Arc<dyn Clock>,
    joints: JointSet,
    bounds: Vec<VariableBounds>,
    tracker: JointStateTracker,
    filters: FilterBank,
    measured_velocity: JointVector,
    previous_joint_velocity: JointVector,
    status: StatusCode,
    waiting_for_command: bool,
    zero_velocity_count: u32,
    updated_filters: bool,
    last_sent_command: Option<JointTrajectory>,
    command_frame_transform: Option<Isometry3<f64>>,
    log_throttle: LogThrottle,
}

impl<M: KinematicModel, O: ServoOutput> ServoCalcs<M, O> {
    /// Creates the cycle state for the joint group of `model`.
    /// # Errors
    /// * ConfigException if the parameters are invalid or the model has no joints.
    pub fn new(
        parameters: ServoParameters,
        model: M,
        output: O,
        input: ServoInput,
        clock: Arc<dyn Clock>,
    ) -> ServoResult<Self> {
        parameters.validate()?;
        let joints = JointSet::new(model.joint_names());
        if joints.is_empty() {
            return Err(create_config_exception(
                "the kinematic model does not have any active joints",
            ));
        }
        let bounds = joints
            .names()
            .iter()
            .map(|name| {
                model.joint_bounds(name).unwrap_or_else(|| {
                    warn!("No bounds found for joint {}, it is not limited", name);
                    VariableBounds::unbounded()
                })
            })
            .collect();
        let num_joints = joints.len();
        let log_throttle_window = parameters.log_throttle_window();
        Ok(ServoCalcs {
            tracker: JointStateTracker::new(joints.clone(), log_throttle_window),
            filters: FilterBank::new(num_joints, parameters.low_pass_filter_coeff),
            measured_velocity: JointVector::zeros(num_joints),
            previous_joint_velocity: JointVector::zeros(num_joints),
            status: StatusCode::Ok,
            waiting_for_command: true,
            zero_velocity_count: 0,
            updated_filters: false,
            last_sent_command: None,
            command_frame_transform: None,
            log_throttle: LogThrottle::new(log_throttle_window),
            parameters,
            model,
            output,
            input,
            clock,
            joints,
            bounds,
        })
    }

    /// Prepares a new run of the loop.
    ///
    /// Reads the latest joint state, resynchronizes the filters to it and seeds the last sent
    /// command with the current positions at rest.
    /// # Return
    /// false if no complete joint state is available yet.
    pub fn initialize(&mut self) -> bool {
        let joint_state = match self.input.latest_joint_state() {
            Some(joint_state) => joint_state,
            None => return false,
        };
        if !self.tracker.update_joints(&joint_state) {
            return false;
        }
        let original = self.tracker.original().clone();
        self.filters.reset(&original.position);
        self.previous_joint_velocity = JointVector::zeros(self.joints.len());
        self.status = StatusCode::Ok;
        self.zero_velocity_count = 0;
        self.waiting_for_command = true;
        self.input.set_waiting_for_command(true);
        self.last_sent_command = Some(initial_command(
            &self.joints,
            &original.position,
            &self.parameters,
            self.clock.now(),
        ));
        true
    }

    /// Runs one servo cycle.
    ///
    /// Never fails. Invalid input, missing data and safety trips are reported through the
    /// returned [`CycleOutcome`] and the published [`StatusCode`].
    /// # Arguments
    /// * `stop` - Checked while waiting for a complete joint state.
    pub fn tick(&mut self, stop: &AtomicBool) -> CycleOutcome {
        self.output.publish_status(self.status);
        self.status = StatusCode::Ok;

        // keep the joints and the command frame up to date even when idle, so the filters and
        // the cached transform never jump
        let snapshot = loop {
            let snapshot = self.input.snapshot();
            if let Some(joint_state) = snapshot.joint_state.as_ref() {
                if self.tracker.update_joints(joint_state) {
                    self.update_measured_velocity(joint_state.velocity.len());
                    break snapshot;
                }
            }
            if stop.load(Ordering::Acquire) {
                return CycleOutcome::Stopped;
            }
            spin_sleep::sleep(JOINT_STATE_RETRY_PERIOD);
        };

        self.publish_worst_case_stop_time();
        self.update_command_frame_transform();

        let have_nonzero_command = snapshot.twist_non_zero || snapshot.joint_jog_non_zero;
        self.updated_filters = false;

        if self.waiting_for_command || snapshot.paused {
            let original = self.tracker.original().position.clone();
            self.filters.reset(&original);
            self.updated_filters = true;
            if self.waiting_for_command {
                self.waiting_for_command = snapshot.twist_stamp == Duration::ZERO
                    && snapshot.joint_jog_stamp == Duration::ZERO;
                self.input
                    .set_waiting_for_command(self.waiting_for_command);
            }
            return CycleOutcome::Idle;
        }

        let now = self.clock.now();
        let timeout = self.parameters.command_timeout();
        let twist_is_stale = now.saturating_sub(snapshot.twist_stamp) >= timeout;
        let joint_command_is_stale = now.saturating_sub(snapshot.joint_jog_stamp) >= timeout;

        let computed = match (&snapshot.twist, &snapshot.joint_jog) {
            (Some(twist), _) if snapshot.twist_non_zero && !twist_is_stale => {
                Some(self.cartesian_servo_calcs(twist, &snapshot))
            }
            (_, Some(joint_jog)) if snapshot.joint_jog_non_zero && !joint_command_is_stale => {
                Some(self.joint_servo_calcs(joint_jog, &snapshot))
            }
            _ => None,
        };
        let mut joint_trajectory = match computed {
            Some(Some(joint_trajectory)) => joint_trajectory,
            Some(None) => {
                self.reset_filters();
                return CycleOutcome::Aborted;
            }
            None => {
                // nothing usable: repeat the last command at rest
                let mut joint_trajectory = self.last_sent_command.clone().unwrap_or_else(|| {
                    initial_command(
                        &self.joints,
                        &self.tracker.original().position,
                        &self.parameters,
                        now,
                    )
                });
                zero_velocities(&mut joint_trajectory);
                joint_trajectory
            }
        };

        if twist_is_stale && joint_command_is_stale && self.log_throttle.ready("stale_command") {
            warn!("Stale command. Try a larger 'incoming_command_timeout' parameter?");
        }

        if !have_nonzero_command {
            sudden_halt(
                &mut joint_trajectory,
                self.tracker.original(),
                &self.parameters,
            );
            self.zero_velocity_count = self.zero_velocity_count.saturating_add(1);
        } else {
            self.zero_velocity_count = 0;
        }

        let halt_limit = self.parameters.num_outgoing_halt_msgs_to_publish;
        let ok_to_publish =
            have_nonzero_command || halt_limit == 0 || self.zero_velocity_count <= halt_limit;

        let outcome = if ok_to_publish {
            joint_trajectory.stamp = self.clock.now();
            match self.parameters.command_out_type {
                CommandOutType::JointTrajectory => {
                    self.output.publish_trajectory(&joint_trajectory);
                }
                CommandOutType::Float64MultiArray => {
                    let data = multiarray_data(&joint_trajectory, &self.parameters);
                    self.output.publish_multiarray(&data);
                }
            }
            self.last_sent_command = Some(joint_trajectory);
            CycleOutcome::Published
        } else {
            if self.log_throttle.ready("all_zero_command") {
                debug!("All-zero command. Doing nothing.");
            }
            CycleOutcome::Suppressed
        };

        if !self.updated_filters {
            self.reset_filters();
        }
        outcome
    }

    /// Maps a Cartesian command to a joint command.
    ///
    /// `None` if the command is invalid or cannot be converted.
    fn cartesian_servo_calcs(
        &mut self,
        command: &TwistCommand,
        snapshot: &InputSnapshot,
    ) -> Option<JointTrajectory> {
        let twist = command.as_vector();
        if let Err(rejection) = validate_command(twist.iter(), self.parameters.command_in_type) {
            self.warn_rejected(rejection);
            return None;
        }
        let mut twist = enforce_control_dimensions(&twist, &snapshot.control_dimensions);

        if command.frame_id != self.parameters.planning_frame {
            let transform = if command.frame_id.is_empty()
                || command.frame_id == self.parameters.robot_link_command_frame
            {
                self.command_frame_transform
            } else {
                relative_transform(
                    &self.model,
                    &self.tracker.original().position,
                    &self.parameters.planning_frame,
                    &command.frame_id,
                )
            };
            match transform {
                Some(transform) => twist = rotate_cartesian_vector(&transform, &twist),
                None => {
                    if self.log_throttle.ready("unknown_command_frame") {
                        warn!(
                            "Unable to transform the command from frame '{}'. Skipping this datapoint.",
                            command.frame_id
                        );
                    }
                    return None;
                }
            }
        }

        let delta_x = scale_cartesian_command(&twist, &self.parameters);
        let positions = self.tracker.original().position.clone();
        let jacobian = self.model.jacobian(&positions);
        if jacobian.nrows() != TASK_DIMENSIONS || jacobian.ncols() != self.joints.len() {
            if self.log_throttle.ready("jacobian_shape") {
                error!(
                    "Expected a {}x{} Jacobian, got {}x{}",
                    TASK_DIMENSIONS,
                    self.joints.len(),
                    jacobian.nrows(),
                    jacobian.ncols()
                );
            }
            return None;
        }
        let (jacobian, delta_x) = remove_drift_dimensions(
            jacobian,
            DVector::from_column_slice(delta_x.as_slice()),
            &snapshot.drift_dimensions,
        );
        let svd = match ThinSvd::new(&jacobian) {
            Some(svd) => svd,
            None => {
                if self.log_throttle.ready("svd") {
                    error!("Singular value decomposition of the Jacobian failed");
                }
                return None;
            }
        };
        let pseudo_inverse = svd.pseudo_inverse();
        let mut delta_theta = &pseudo_inverse * &delta_x;

        let (scale, singularity_status) = velocity_scaling_factor_for_singularity(
            &self.model,
            &positions,
            &delta_x,
            &svd,
            &pseudo_inverse,
            &SingularityThresholds {
                lower: self.parameters.lower_singularity_threshold,
                hard_stop: self.parameters.hard_stop_singularity_threshold,
            },
        );
        if singularity_status != StatusCode::Ok {
            self.status = self.status.worst(singularity_status);
            if self.log_throttle.ready("singularity") {
                if singularity_status.is_halt() {
                    error!("{}", singularity_status);
                } else {
                    warn!("{}", singularity_status);
                }
            }
        }
        delta_theta *= scale;

        self.internal_servo_update(delta_theta, snapshot)
    }

    /// Maps a joint command to a joint command for the whole group.
    ///
    /// `None` if the command is invalid.
    fn joint_servo_calcs(
        &mut self,
        command: &JointJogCommand,
        snapshot: &InputSnapshot,
    ) -> Option<JointTrajectory> {
        if let Err(rejection) =
            validate_command(&command.velocities, self.parameters.command_in_type)
        {
            self.warn_rejected(rejection);
            return None;
        }
        let (delta_theta, unknown) = scale_joint_command(command, &self.joints, &self.parameters);
        if !unknown.is_empty() && self.log_throttle.ready("unknown_jog_joint") {
            warn!("Ignoring joints {:?}", unknown);
        }
        self.internal_servo_update(delta_theta, snapshot)
    }

    /// Turns a joint increment into the outgoing command, enforcing all joint limits.
    fn internal_servo_update(
        &mut self,
        mut delta_theta: JointVector,
        snapshot: &InputSnapshot,
    ) -> Option<JointTrajectory> {
        let original = self.tracker.original().clone();
        let mut internal = original.clone();
        let period = self.parameters.publish_period;

        limit_joint_increments(
            &self.bounds,
            &self.previous_joint_velocity,
            &mut delta_theta,
            period,
        );

        let collision_scale = snapshot.collision_velocity_scale;
        if collision_scale > 0. && collision_scale < 1. {
            self.status = self.status.worst(StatusCode::DecelerateForCollision);
            if self.log_throttle.ready("collision_decelerate") {
                warn!("{}", StatusCode::DecelerateForCollision);
            }
        } else if collision_scale == 0. {
            self.status = self.status.worst(StatusCode::HaltForCollision);
            if self.log_throttle.ready("collision_halt") {
                error!("Halting for collision!");
            }
        }
        delta_theta *= collision_scale;

        if !self.apply_joint_update(&delta_theta, &mut internal) {
            return None;
        }
        self.updated_filters = true;

        let mut joint_trajectory =
            compose_joint_trajectory(&self.joints, &internal, &self.parameters, self.clock.now());

        let offending = joints_moving_past_position_limits(
            &self.bounds,
            &original.position,
            &self.measured_velocity,
            self.parameters.joint_limit_margin,
        );
        if !offending.is_empty() {
            if self.log_throttle.ready("position_limit") {
                let names: Vec<&str> = offending
                    .iter()
                    .map(|&i| self.joints.names()[i].as_str())
                    .collect();
                warn!("{:?} close to a position limit. Halting.", names);
            }
            sudden_halt(&mut joint_trajectory, &original, &self.parameters);
            self.status = self.status.worst(StatusCode::JointBound);
            self.previous_joint_velocity.fill(0.);
        }

        if self.parameters.use_gazebo {
            insert_redundant_points(
                &mut joint_trajectory,
                GAZEBO_REDUNDANT_MESSAGE_COUNT,
                period,
            );
        }
        Some(joint_trajectory)
    }

    /// Adds the increment to every joint, filters the positions and derives the velocities.
    ///
    /// false if the sizes disagree or an increment is not finite. Nothing is changed then.
    fn apply_joint_update(
        &mut self,
        delta_theta: &JointVector,
        joint_state: &mut JointStateSnapshot,
    ) -> bool {
        let num_joints = joint_state.position.len();
        if delta_theta.len() != num_joints
            || joint_state.velocity.len() != num_joints
            || self.previous_joint_velocity.len() != num_joints
            || self.filters.len() != num_joints
        {
            if self.log_throttle.ready("length_mismatch") {
                error!("Lengths of output and increments do not match.");
            }
            return false;
        }
        if delta_theta.iter().any(|delta| !delta.is_finite()) {
            if self.log_throttle.ready("non_finite_increment") {
                warn!("Joint increment is not finite. Skipping this datapoint.");
            }
            return false;
        }
        let period = self.parameters.publish_period;
        for i in 0..num_joints {
            let position = joint_state.position[i] + delta_theta[i];
            joint_state.position[i] = self.filters.filter(i, position);
            joint_state.velocity[i] = delta_theta[i] / period;
            self.previous_joint_velocity[i] = joint_state.velocity[i];
        }
        true
    }

    fn warn_rejected(&mut self, rejection: CommandRejection) {
        match rejection {
            CommandRejection::NotANumber => {
                if self.log_throttle.ready("nan_command") {
                    warn!("nan in incoming command. Skipping this datapoint.");
                }
            }
            CommandRejection::OutOfUnitRange => {
                if self.log_throttle.ready("unit_range_command") {
                    warn!("Component of incoming command is >1. Skipping this datapoint.");
                }
            }
        }
    }

    fn reset_filters(&mut self) {
        let original = self.tracker.original().position.clone();
        self.filters.reset(&original);
        self.updated_filters = true;
    }

    /// Keeps the measured velocities of the joints the message reported, zero for the others.
    fn update_measured_velocity(&mut self, reported_velocities: usize) {
        self.measured_velocity = if reported_velocities == 0 {
            JointVector::zeros(self.joints.len())
        } else {
            self.tracker.original().velocity.clone()
        };
    }

    fn publish_worst_case_stop_time(&mut self) {
        let (stop_time, unbounded) = worst_case_stop_time(&self.bounds, &self.measured_velocity);
        if !unbounded.is_empty() && self.log_throttle.ready("unbounded_acceleration") {
            warn!(
                "An acceleration limit is not defined for joints {:?}; minimum stop distance should not be used for collision checking",
                unbounded
                    .iter()
                    .map(|&i| self.joints.names()[i].as_str())
                    .collect::<Vec<&str>>()
            );
        }
        self.output.publish_worst_case_stop_time(stop_time);
    }

    fn update_command_frame_transform(&mut self) {
        match relative_transform(
            &self.model,
            &self.tracker.original().position,
            &self.parameters.planning_frame,
            &self.parameters.robot_link_command_frame,
        ) {
            Some(transform) => {
                self.command_frame_transform = Some(transform);
                self.input.set_command_frame_transform(transform);
            }
            None => {
                if self.log_throttle.ready("command_frame_transform") {
                    warn!(
                        "Unable to look up the transform from '{}' to '{}'",
                        self.parameters.planning_frame, self.parameters.robot_link_command_frame
                    );
                }
            }
        }
    }

    /// Worst condition found in the current cycle. Published at the start of the next one.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// True until a stamped command arrived after [`initialize`](`Self::initialize`).
    pub fn is_waiting_for_command(&self) -> bool {
        self.waiting_for_command
    }

    pub fn joints(&self) -> &JointSet {
        &self.joints
    }

    pub fn parameters(&self) -> &ServoParameters {
        &self.parameters
    }

    /// The command published last, or the initial command at rest.
    pub fn last_sent_command(&self) -> Option<&JointTrajectory> {
        self.last_sent_command.as_ref()
    }

    pub fn output(&self) -> &O {
        &self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Limit, MockKinematicModel};
    use crate::servo::joint_state::JointStateMessage;
    use crate::servo::output::{decompose, RecordingOutput};
    use crate::servo::parameters::CommandInType;
    use crate::utils::ManualClock;
    use nalgebra::{DMatrix, Translation3, UnitQuaternion, Vector3};
    use std::f64::consts::FRAC_PI_2;

    const PERIOD: f64 = 0.01;

    fn joint_names() -> Vec<String> {
        vec!["joint_1".to_string(), "joint_2".to_string()]
    }

    /// Two joints moving the tool along x and y.
    fn planar_jacobian(_: &JointVector) -> DMatrix<f64> {
        let mut jacobian = DMatrix::zeros(6, 2);
        jacobian[(0, 0)] = 1.;
        jacobian[(1, 1)] = 1.;
        jacobian
    }

    fn model_with<F>(bounds: VariableBounds, link_transform: F) -> MockKinematicModel
    where
        F: FnMut(&str, &JointVector) -> Option<Isometry3<f64>> + Send + 'static,
    {
        let mut model = MockKinematicModel::new();
        model.expect_joint_names().returning(joint_names);
        model.expect_joint_bounds().returning(move |_| Some(bounds));
        model.expect_jacobian().returning(planar_jacobian);
        model.expect_link_transform().returning(link_transform);
        model
    }

    fn planar_model() -> MockKinematicModel {
        model_with(VariableBounds::unbounded(), |_, _| Some(Isometry3::identity()))
    }

    fn quarter_turn() -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::new(1., 2., 3.),
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2),
        )
    }

    fn parameters() -> ServoParameters {
        ServoParameters {
            publish_period: PERIOD,
            command_in_type: CommandInType::SpeedUnits,
            low_pass_filter_coeff: 2.,
            incoming_command_timeout: 1.,
            drift_dimensions: [false, false, true, true, true, true],
            ..Default::default()
        }
    }

    struct Fixture {
        calcs: ServoCalcs<MockKinematicModel, RecordingOutput>,
        input: ServoInput,
        output: RecordingOutput,
        clock: Arc<ManualClock>,
        stop: AtomicBool,
    }

    impl Fixture {
        /// Loop started at rest at `[0, 0]`.
        fn started(parameters: ServoParameters, model: MockKinematicModel) -> Self {
            let input = ServoInput::new(&parameters);
            let output = RecordingOutput::new();
            let clock = Arc::new(ManualClock::new(Duration::from_secs(100)));
            let calcs =
                ServoCalcs::new(parameters, model, output.clone(), input.clone(), clock.clone())
                    .unwrap();
            let mut fixture = Fixture {
                calcs,
                input,
                output,
                clock,
                stop: AtomicBool::new(false),
            };
            fixture.joint_state(vec![0., 0.], vec![0., 0.]);
            assert!(fixture.calcs.initialize());
            fixture
        }

        fn joint_state(&mut self, position: Vec<f64>, velocity: Vec<f64>) {
            self.input
                .joint_state(JointStateMessage::new(joint_names(), position, velocity));
        }

        fn tick(&mut self) -> CycleOutcome {
            self.clock.advance(Duration::from_secs_f64(PERIOD));
            self.calcs.tick(&self.stop)
        }

        fn twist(&self, linear: Vector3<f64>, frame_id: &str) {
            self.input.twist_command(TwistCommand::new(
                linear,
                Vector3::zeros(),
                frame_id,
                self.clock.now(),
            ));
        }

        /// Sends the twist, leaves the wait for the first command and runs one active cycle.
        fn servo_twist(&mut self, linear: Vector3<f64>, frame_id: &str) -> CycleOutcome {
            self.twist(linear, frame_id);
            self.tick();
            self.twist(linear, frame_id);
            self.tick()
        }

        fn last_point(&self) -> (Vec<f64>, Vec<f64>) {
            let trajectory = self.output.last_trajectory().unwrap();
            (
                trajectory.points[0].positions.clone(),
                trajectory.points[0].velocities.clone(),
            )
        }
    }

    #[test]
    fn initialize_requires_complete_joint_state() {
        let parameters = parameters();
        let input = ServoInput::new(&parameters);
        let mut calcs = ServoCalcs::new(
            parameters,
            planar_model(),
            RecordingOutput::new(),
            input.clone(),
            Arc::new(ManualClock::default()),
        )
        .unwrap();
        assert!(!calcs.initialize());
        input.joint_state(JointStateMessage::new(
            vec!["joint_1".to_string()],
            vec![0.],
            vec![],
        ));
        assert!(!calcs.initialize());
        assert!(calcs.last_sent_command().is_none());
    }

    #[test]
    fn initialize_seeds_last_sent_command() {
        let fixture = Fixture::started(parameters(), planar_model());
        let command = fixture.calcs.last_sent_command().unwrap();
        assert_eq!(command.joint_names, joint_names());
        assert_eq!(command.points[0].positions, vec![0., 0.]);
        assert_eq!(command.points[0].velocities, vec![0., 0.]);
    }

    #[test]
    fn rejects_invalid_parameters() {
        let result = ServoCalcs::new(
            ServoParameters {
                publish_period: -1.,
                ..Default::default()
            },
            planar_model(),
            RecordingOutput::new(),
            ServoInput::new(&ServoParameters::default()),
            Arc::new(ManualClock::default()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn waits_for_a_stamped_command() {
        let mut fixture = Fixture::started(parameters(), planar_model());
        assert_eq!(fixture.tick(), CycleOutcome::Idle);
        assert!(fixture.calcs.is_waiting_for_command());
        fixture.input.twist_command(TwistCommand::new(
            Vector3::x(),
            Vector3::zeros(),
            "",
            Duration::ZERO,
        ));
        assert_eq!(fixture.tick(), CycleOutcome::Idle);
        assert!(fixture.calcs.is_waiting_for_command());
        fixture.twist(Vector3::x(), "");
        assert_eq!(fixture.tick(), CycleOutcome::Idle);
        assert!(!fixture.calcs.is_waiting_for_command());
        assert!(!fixture.input.is_waiting_for_command());
        assert_eq!(fixture.tick(), CycleOutcome::Published);
        let recording = fixture.output.recording();
        assert_eq!(recording.trajectories.len(), 1);
        assert_eq!(recording.statuses.len(), 4);
        assert_eq!(recording.stop_times.len(), 4);
    }

    #[test]
    fn zero_twist_keeps_robot_at_rest() {
        let mut fixture = Fixture::started(parameters(), planar_model());
        assert_eq!(
            fixture.servo_twist(Vector3::zeros(), ""),
            CycleOutcome::Published
        );
        let (positions, velocities) = fixture.last_point();
        assert_eq!(positions, vec![0., 0.]);
        assert_eq!(velocities, vec![0., 0.]);
        assert_eq!(fixture.calcs.status(), StatusCode::Ok);
    }

    #[test]
    fn twist_moves_joints_through_filter() {
        let mut fixture = Fixture::started(parameters(), planar_model());
        assert_eq!(
            fixture.servo_twist(Vector3::x(), ""),
            CycleOutcome::Published
        );
        let (positions, velocities) = fixture.last_point();
        // increment of 0.01 filtered with coefficient 2 from rest
        assert!((positions[0] - 0.01 / 3.).abs() < 1e-12);
        assert_eq!(positions[1], 0.);
        assert!((velocities[0] - 1.).abs() < 1e-12);
        assert_eq!(fixture.calcs.status(), StatusCode::Ok);
    }

    #[test]
    fn collision_scale_zero_halts() {
        let mut fixture = Fixture::started(parameters(), planar_model());
        fixture.input.collision_velocity_scale(0.);
        assert_eq!(
            fixture.servo_twist(Vector3::new(0.5, -0.5, 0.), ""),
            CycleOutcome::Published
        );
        let (_, velocities) = fixture.last_point();
        assert_eq!(velocities, vec![0., 0.]);
        assert_eq!(fixture.calcs.status(), StatusCode::HaltForCollision);
        // published at the start of the next cycle, then cleared
        fixture.tick();
        assert_eq!(
            fixture.output.recording().statuses.last(),
            Some(&StatusCode::HaltForCollision)
        );
    }

    #[test]
    fn collision_scale_decelerates() {
        let mut fixture = Fixture::started(parameters(), planar_model());
        fixture.input.collision_velocity_scale(0.5);
        fixture.servo_twist(Vector3::x(), "");
        let (_, velocities) = fixture.last_point();
        assert!((velocities[0] - 0.5).abs() < 1e-12);
        assert_eq!(fixture.calcs.status(), StatusCode::DecelerateForCollision);
    }

    #[test]
    fn repeated_halts_are_suppressed() {
        let parameters = ServoParameters {
            num_outgoing_halt_msgs_to_publish: 3,
            ..parameters()
        };
        let mut fixture = Fixture::started(parameters, planar_model());
        fixture.twist(Vector3::zeros(), "");
        fixture.tick();
        let outcomes: Vec<CycleOutcome> = (0..5).map(|_| fixture.tick()).collect();
        assert_eq!(
            outcomes,
            vec![
                CycleOutcome::Published,
                CycleOutcome::Published,
                CycleOutcome::Published,
                CycleOutcome::Suppressed,
                CycleOutcome::Suppressed,
            ]
        );
        // a non-zero command ends the streak
        fixture.twist(Vector3::x(), "");
        assert_eq!(fixture.tick(), CycleOutcome::Published);
        fixture.twist(Vector3::zeros(), "");
        assert_eq!(fixture.tick(), CycleOutcome::Published);
    }

    #[test]
    fn unlimited_halts_keep_publishing() {
        let parameters = ServoParameters {
            num_outgoing_halt_msgs_to_publish: 0,
            ..parameters()
        };
        let mut fixture = Fixture::started(parameters, planar_model());
        fixture.twist(Vector3::zeros(), "");
        fixture.tick();
        for _ in 0..10 {
            assert_eq!(fixture.tick(), CycleOutcome::Published);
        }
    }

    #[test]
    fn stale_command_repeats_last_command_at_rest() {
        let mut fixture = Fixture::started(parameters(), planar_model());
        fixture.servo_twist(Vector3::x(), "");
        let (moved_positions, _) = fixture.last_point();
        fixture.clock.advance(Duration::from_secs(2));
        assert_eq!(fixture.tick(), CycleOutcome::Published);
        let (positions, velocities) = fixture.last_point();
        assert_eq!(positions, moved_positions);
        assert_eq!(velocities, vec![0., 0.]);
    }

    #[test]
    fn invalid_commands_are_discarded() {
        let parameters = ServoParameters {
            command_in_type: CommandInType::Unitless,
            ..parameters()
        };
        let mut fixture = Fixture::started(parameters, planar_model());
        assert_eq!(
            fixture.servo_twist(Vector3::new(1.5, 0., 0.), ""),
            CycleOutcome::Aborted
        );
        fixture.twist(Vector3::new(f64::NAN, 0., 0.), "");
        assert_eq!(fixture.tick(), CycleOutcome::Aborted);
        assert!(fixture.output.recording().trajectories.is_empty());
    }

    #[test]
    fn cached_transform_is_used_for_command_frame() {
        // lookups of "tool" alternate between a quarter turn and the identity, so the cached
        // transform of the current cycle differs from any fresh lookup
        let tool_lookups = Arc::new(parking_lot::Mutex::new(0));
        let lookups = tool_lookups.clone();
        let model = model_with(VariableBounds::unbounded(), move |name, _| {
            if name == "tool" {
                let mut lookups = lookups.lock();
                *lookups += 1;
                if *lookups % 2 == 1 {
                    return Some(quarter_turn());
                }
            }
            Some(Isometry3::identity())
        });
        let parameters = ServoParameters {
            robot_link_command_frame: "tool".to_string(),
            ..parameters()
        };
        let mut fixture = Fixture::started(parameters, model);
        assert_eq!(
            fixture.servo_twist(Vector3::x(), "tool"),
            CycleOutcome::Published
        );
        let (_, velocities) = fixture.last_point();
        assert!((velocities[0] - 1.).abs() < 1e-12);
        assert!(velocities[1].abs() < 1e-12);
        assert_eq!(*tool_lookups.lock(), 2);

        // an empty frame also means the command frame
        fixture.twist(Vector3::x(), "");
        fixture.tick();
        let (_, velocities) = fixture.last_point();
        assert!(velocities[0].abs() < 1e-12);
        assert!((velocities[1] - 1.).abs() < 1e-12);
        assert_eq!(*tool_lookups.lock(), 3);
        assert!(fixture.input.command_frame_transform().is_some());
    }

    #[test]
    fn other_frames_use_a_fresh_lookup() {
        let model = model_with(VariableBounds::unbounded(), |name, _| match name {
            "camera" => Some(quarter_turn()),
            "unknown" => None,
            _ => Some(Isometry3::identity()),
        });
        let mut fixture = Fixture::started(parameters(), model);
        assert_eq!(
            fixture.servo_twist(Vector3::x(), "camera"),
            CycleOutcome::Published
        );
        let (_, velocities) = fixture.last_point();
        assert!(velocities[0].abs() < 1e-12);
        assert!((velocities[1] - 1.).abs() < 1e-12);

        fixture.twist(Vector3::x(), "unknown");
        assert_eq!(fixture.tick(), CycleOutcome::Aborted);
    }

    #[test]
    fn control_dimensions_zero_the_command() {
        let mut fixture = Fixture::started(parameters(), planar_model());
        fixture
            .input
            .change_control_dimensions([false, true, true, true, true, true]);
        fixture.servo_twist(Vector3::new(1., 1., 0.), "");
        let (_, velocities) = fixture.last_point();
        assert_eq!(velocities[0], 0.);
        assert!((velocities[1] - 1.).abs() < 1e-12);
    }

    #[test]
    fn joint_jog_moves_named_joints() {
        let mut fixture = Fixture::started(parameters(), planar_model());
        let jog = |stamp| {
            JointJogCommand::new(
                vec!["joint_2".to_string(), "gripper".to_string()],
                vec![-0.5, 1.],
                stamp,
            )
        };
        fixture.input.joint_jog_command(jog(fixture.clock.now()));
        fixture.tick();
        fixture.input.joint_jog_command(jog(fixture.clock.now()));
        assert_eq!(fixture.tick(), CycleOutcome::Published);
        let (_, velocities) = fixture.last_point();
        assert_eq!(velocities[0], 0.);
        assert!((velocities[1] + 0.5).abs() < 1e-12);
    }

    #[test]
    fn twist_takes_priority_over_joint_jog() {
        let mut fixture = Fixture::started(parameters(), planar_model());
        fixture.input.joint_jog_command(JointJogCommand::new(
            vec!["joint_2".to_string()],
            vec![1.],
            fixture.clock.now(),
        ));
        fixture.servo_twist(Vector3::x(), "");
        let (_, velocities) = fixture.last_point();
        assert!((velocities[0] - 1.).abs() < 1e-12);
        assert_eq!(velocities[1], 0.);
    }

    #[test]
    fn joint_moving_past_position_limit_halts() {
        let bounds = VariableBounds {
            position: Some(Limit::new(-1., 1.)),
            ..VariableBounds::unbounded()
        };
        let model = model_with(bounds, |_, _| Some(Isometry3::identity()));
        let mut fixture = Fixture::started(parameters(), model);
        fixture.joint_state(vec![0.95, 0.], vec![0.2, 0.]);
        assert_eq!(
            fixture.servo_twist(Vector3::x(), ""),
            CycleOutcome::Published
        );
        let (positions, velocities) = fixture.last_point();
        assert_eq!(positions, vec![0.95, 0.]);
        assert_eq!(velocities, vec![0., 0.]);
        assert_eq!(fixture.calcs.status(), StatusCode::JointBound);
    }

    #[test]
    fn acceleration_bounds_limit_the_output() {
        let bounds = VariableBounds {
            acceleration: Some(Limit::symmetric(10.)),
            ..VariableBounds::unbounded()
        };
        let model = model_with(bounds, |_, _| Some(Isometry3::identity()));
        let mut fixture = Fixture::started(parameters(), model);
        fixture.servo_twist(Vector3::x(), "");
        let (_, velocities) = fixture.last_point();
        // 10 rad/s^2 from rest for one 10 ms cycle
        assert!((velocities[0] - 0.1).abs() < 1e-9);
    }

    /// Jacobian rows `x = [10, 0]` and `y = [0, q1]`: condition number 20 at `q1 = 0.5`, singular
    /// at `q1 = 0`.
    fn singular_model() -> MockKinematicModel {
        let mut model = MockKinematicModel::new();
        model.expect_joint_names().returning(joint_names);
        model
            .expect_joint_bounds()
            .returning(|_| Some(VariableBounds::unbounded()));
        model.expect_jacobian().returning(|q| {
            let mut jacobian = DMatrix::zeros(6, 2);
            jacobian[(0, 0)] = 10.;
            jacobian[(1, 1)] = q[1];
            jacobian
        });
        model
            .expect_link_transform()
            .returning(|_, _| Some(Isometry3::identity()));
        model
    }

    #[test]
    fn decelerates_close_to_singularity() {
        let model = singular_model();
        let mut fixture = Fixture::started(parameters(), model);
        fixture.joint_state(vec![0., 0.5], vec![0., 0.]);
        fixture.servo_twist(-Vector3::y(), "");
        assert_eq!(
            fixture.calcs.status(),
            StatusCode::DecelerateForSingularity
        );
        let (_, velocities) = fixture.last_point();
        assert!((velocities[1] + 2. * 10. / 13.).abs() < 1e-6);

        fixture.twist(Vector3::y(), "");
        fixture.tick();
        assert_eq!(fixture.calcs.status(), StatusCode::Ok);
    }

    #[test]
    fn paused_loop_only_tracks_joints() {
        let mut fixture = Fixture::started(parameters(), planar_model());
        fixture.twist(Vector3::x(), "");
        fixture.tick();
        fixture.input.set_paused(true);
        fixture.twist(Vector3::x(), "");
        assert_eq!(fixture.tick(), CycleOutcome::Idle);
        assert!(fixture.output.recording().trajectories.is_empty());
        fixture.input.set_paused(false);
        fixture.twist(Vector3::x(), "");
        assert_eq!(fixture.tick(), CycleOutcome::Published);
    }

    #[test]
    fn flat_array_output() {
        let parameters = ServoParameters {
            command_out_type: CommandOutType::Float64MultiArray,
            publish_joint_positions: false,
            ..parameters()
        };
        let mut fixture = Fixture::started(parameters, planar_model());
        fixture.servo_twist(Vector3::y(), "");
        let recording = fixture.output.recording();
        assert!(recording.trajectories.is_empty());
        let data = recording.multiarrays.last().unwrap();
        assert_eq!(data.len(), 2);
        assert!((data[1] - 1.).abs() < 1e-12);
    }

    #[test]
    fn worst_case_stop_time_uses_measured_velocity() {
        let bounds = VariableBounds {
            acceleration: Some(Limit::symmetric(2.)),
            ..VariableBounds::unbounded()
        };
        let model = model_with(bounds, |_, _| Some(Isometry3::identity()));
        let mut fixture = Fixture::started(parameters(), model);
        fixture.joint_state(vec![0., 0.], vec![1., -3.]);
        fixture.tick();
        let recording = fixture.output.recording();
        assert!((recording.stop_times.last().unwrap() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn gazebo_pads_trajectory() {
        let parameters = ServoParameters {
            use_gazebo: true,
            ..parameters()
        };
        let mut fixture = Fixture::started(parameters, planar_model());
        fixture.servo_twist(Vector3::x(), "");
        let trajectory = fixture.output.last_trajectory().unwrap();
        assert_eq!(trajectory.points.len(), GAZEBO_REDUNDANT_MESSAGE_COUNT);
    }

    #[test]
    fn zero_motion_output_decomposes_to_original() {
        let mut fixture = Fixture::started(parameters(), planar_model());
        fixture.joint_state(vec![0.3, -0.2], vec![0., 0.]);
        assert!(fixture.calcs.initialize());
        fixture.servo_twist(Vector3::zeros(), "");
        let trajectory = fixture.output.last_trajectory().unwrap();
        let snapshot = decompose(&trajectory, fixture.calcs.joints()).unwrap();
        assert_eq!(snapshot.position.as_slice(), &[0.3, -0.2]);
        assert_eq!(snapshot.velocity.as_slice(), &[0., 0.]);
    }

    #[test]
    fn incomplete_joint_state_returns_on_stop() {
        let mut fixture = Fixture::started(parameters(), planar_model());
        fixture.input.joint_state(JointStateMessage::new(
            vec!["joint_1".to_string()],
            vec![0.],
            vec![],
        ));
        fixture.stop.store(true, Ordering::Release);
        assert_eq!(fixture.tick(), CycleOutcome::Stopped);
    }

    #[test]
    fn halts_at_hard_stop_singularity_threshold() {
        let condition = ThinSvd::new(&DMatrix::from_row_slice(2, 2, &[10., 0., 0., 0.5]))
            .unwrap()
            .condition_number();
        let parameters = ServoParameters {
            lower_singularity_threshold: 17.,
            hard_stop_singularity_threshold: condition,
            ..parameters()
        };
        let mut fixture = Fixture::started(parameters, singular_model());
        fixture.joint_state(vec![0., 0.5], vec![0., 0.]);
        assert_eq!(
            fixture.servo_twist(-Vector3::y(), ""),
            CycleOutcome::Published
        );
        assert_eq!(fixture.calcs.status(), StatusCode::HaltForSingularity);
        let (positions, velocities) = fixture.last_point();
        assert_eq!(velocities, vec![0., 0.]);
        assert!(positions[0].abs() < 1e-12);
        assert!((positions[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn malformed_jacobian_aborts_and_resyncs_filters() {
        // the model only returns a 6x2 Jacobian while q1 stays small
        let mut model = MockKinematicModel::new();
        model.expect_joint_names().returning(joint_names);
        model
            .expect_joint_bounds()
            .returning(|_| Some(VariableBounds::unbounded()));
        model.expect_jacobian().returning(|q| {
            let rows = if q[1] > 0.2 { 5 } else { 6 };
            let mut jacobian = DMatrix::zeros(rows, 2);
            jacobian[(0, 0)] = 1.;
            jacobian[(1, 1)] = 1.;
            jacobian
        });
        model
            .expect_link_transform()
            .returning(|_, _| Some(Isometry3::identity()));
        let mut fixture = Fixture::started(parameters(), model);
        assert_eq!(
            fixture.servo_twist(Vector3::x(), ""),
            CycleOutcome::Published
        );

        fixture.joint_state(vec![0.5, 0.5], vec![0., 0.]);
        fixture.twist(Vector3::x(), "");
        assert_eq!(fixture.tick(), CycleOutcome::Aborted);
        assert_eq!(fixture.output.recording().trajectories.len(), 1);

        // the filter of joint 1 restarts from 0.5 instead of its earlier history
        fixture.joint_state(vec![0.5, 0.1], vec![0., 0.]);
        fixture.twist(Vector3::x(), "");
        assert_eq!(fixture.tick(), CycleOutcome::Published);
        let (positions, _) = fixture.last_point();
        assert!((positions[0] - (0.5 + 0.01 / 3.)).abs() < 1e-12);
    }

    #[test]
    fn position_limit_halt_clears_velocity_history() {
        let bounds = VariableBounds {
            position: Some(Limit::new(-1., 1.)),
            acceleration: Some(Limit::symmetric(10.)),
            ..VariableBounds::unbounded()
        };
        let model = model_with(bounds, |_, _| Some(Isometry3::identity()));
        let mut fixture = Fixture::started(parameters(), model);
        fixture.servo_twist(Vector3::x(), "");
        let (_, velocities) = fixture.last_point();
        assert!((velocities[0] - 0.1).abs() < 1e-9);

        fixture.joint_state(vec![0.95, 0.], vec![0.2, 0.]);
        fixture.twist(Vector3::x(), "");
        assert_eq!(fixture.tick(), CycleOutcome::Published);
        assert_eq!(fixture.calcs.status(), StatusCode::JointBound);

        // back inside the margin the acceleration is limited from rest again
        fixture.joint_state(vec![0., 0.], vec![0., 0.]);
        fixture.twist(Vector3::x(), "");
        assert_eq!(fixture.tick(), CycleOutcome::Published);
        assert_eq!(fixture.calcs.status(), StatusCode::Ok);
        let (_, velocities) = fixture.last_point();
        assert!((velocities[0] - 0.1).abs() < 1e-9);
    }
}
