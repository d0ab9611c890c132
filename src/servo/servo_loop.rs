// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the fixed-period driver running the servo cycle on its own thread.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use nalgebra::Isometry3;
use tracing::{debug, info, warn};

use crate::exception::{ServoException, ServoResult};
use crate::model::KinematicModel;
use crate::servo::command::ServoInput;
use crate::servo::control_tools::{prepare_cycle_thread, RealtimeConfig};
use crate::servo::joint_state::JointStateMessage;
use crate::servo::output::ServoOutput;
use crate::servo::parameters::ServoParameters;
use crate::servo::servo_calcs::{ServoCalcs, ServoState};
use crate::utils::{Clock, SystemClock};

/// Poll interval of [`Servo::wait_for_initialized`].
static INITIALIZATION_POLL_PERIOD: Duration = Duration::from_millis(5);

/// Servo loop converting incoming Cartesian and joint commands into joint commands at a fixed
/// rate.
///
/// Commands and measurements are fed through the [`ServoInput`] returned by
/// [`input`](`Self::input`). Outgoing commands go to the [`ServoOutput`] given at construction.
/// ```no_run
/// # use servo::{KinematicModel, RecordingOutput, Servo, ServoParameters, ServoResult};
/// # fn run<M: KinematicModel + 'static>(model: M) -> ServoResult<()> {
/// let mut servo = Servo::new(ServoParameters::default(), model, RecordingOutput::new(), None)?;
/// // a joint state has to arrive before the loop can start
/// servo.wait_for_initialized(std::time::Duration::from_secs(1));
/// servo.start()?;
/// # Ok(())
/// # }
/// ```
pub struct Servo<M: KinematicModel + 'static, O: ServoOutput + 'static> {
    input: ServoInput,
    period: Duration,
    realtime_config: RealtimeConfig,
    calcs: Option<ServoCalcs<M, O>>,
    handle: Option<JoinHandle<ServoCalcs<M, O>>>,
    stop_requested: Arc<AtomicBool>,
}

impl<M: KinematicModel + 'static, O: ServoOutput + 'static> Servo<M, O> {
    /// Creates a stopped servo loop using the system clock.
    /// # Arguments
    /// * `parameters` - Parameters of the loop. They are validated here.
    /// * `model` - Kinematic model of the servoed joint group.
    /// * `output` - Sink for the outgoing commands and status.
    /// * `realtime_config` - if set to Enforce, the cycle thread runs with realtime priority.
    ///   Defaults to Ignore.
    /// # Errors
    /// * ConfigException if the parameters are invalid.
    pub fn new<RtConfig: Into<Option<RealtimeConfig>>>(
        parameters: ServoParameters,
        model: M,
        output: O,
        realtime_config: RtConfig,
    ) -> ServoResult<Self> {
        Servo::with_clock(
            parameters,
            model,
            output,
            Arc::new(SystemClock),
            realtime_config,
        )
    }

    /// Like [`new`](`Self::new`), with the clock command stamps are compared against.
    pub fn with_clock<RtConfig: Into<Option<RealtimeConfig>>>(
        parameters: ServoParameters,
        model: M,
        output: O,
        clock: Arc<dyn Clock>,
        realtime_config: RtConfig,
    ) -> ServoResult<Self> {
        let input = ServoInput::new(&parameters);
        let period = parameters.period();
        let calcs = ServoCalcs::new(parameters, model, output, input.clone(), clock)?;
        Ok(Servo {
            input,
            period,
            realtime_config: realtime_config.into().unwrap_or_default(),
            calcs: Some(calcs),
            handle: None,
            stop_requested: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Handle for feeding commands, joint states and the collision scale.
    pub fn input(&self) -> ServoInput {
        self.input.clone()
    }

    /// Starts the cycle thread.
    ///
    /// The loop starts waiting for the first stamped command.
    /// # Errors
    /// * NotInitializedException if no complete joint state has arrived yet.
    /// * RealTimeException if realtime is enforced but cannot be set up.
    /// * ThreadException if the loop is already running, the thread cannot be spawned or a
    ///   previous cycle thread died.
    pub fn start(&mut self) -> ServoResult<()> {
        let mut calcs = match self.calcs.take() {
            Some(calcs) => calcs,
            None if self.handle.is_some() => {
                return Err(ServoException::ThreadException {
                    message: "servo: the loop is already running".to_string(),
                })
            }
            None => {
                return Err(ServoException::ThreadException {
                    message: "servo: the cycle thread died, the servo has to be recreated"
                        .to_string(),
                })
            }
        };
        if !calcs.initialize() {
            self.calcs = Some(calcs);
            return Err(ServoException::NotInitializedException {
                message: "servo: no complete joint state received yet".to_string(),
            });
        }

        self.stop_requested.store(false, Ordering::Release);
        let stop_requested = self.stop_requested.clone();
        let period = self.period;
        let realtime_config = self.realtime_config;
        let (setup_sender, setup_receiver) = channel();

        let spawned = std::thread::Builder::new()
            .name("servo_calcs".to_string())
            .spawn(move || {
                let setup = prepare_cycle_thread(realtime_config);
                let failed = setup.is_err();
                // the receiver only disappears if start() is gone, nothing to report to then
                let _ = setup_sender.send(setup);
                if failed {
                    return calcs;
                }
                run_cycles(&mut calcs, period, &stop_requested);
                calcs
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(error) => {
                return Err(ServoException::ThreadException {
                    message: format!("servo: unable to spawn the cycle thread: {}", error),
                })
            }
        };

        match setup_receiver.recv() {
            Ok(Ok(())) => {
                self.handle = Some(handle);
                info!("Servo loop started with a period of {:?}", period);
                Ok(())
            }
            Ok(Err(error)) => {
                self.calcs = handle.join().ok();
                Err(error)
            }
            Err(_) => {
                self.calcs = handle.join().ok();
                Err(ServoException::ThreadException {
                    message: "servo: the cycle thread exited during setup".to_string(),
                })
            }
        }
    }

    /// Stops the cycle thread after the running cycle completed.
    ///
    /// Does nothing if the loop is not running. The last sent command is kept until the next
    /// [`start`](`Self::start`).
    /// # Errors
    /// * ThreadException if the cycle thread panicked. The cycle state is lost then and the loop
    ///   cannot be started again.
    pub fn stop(&mut self) -> ServoResult<()> {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => return Ok(()),
        };
        self.stop_requested.store(true, Ordering::Release);
        match handle.join() {
            Ok(calcs) => {
                self.calcs = Some(calcs);
                info!("Servo loop stopped");
                Ok(())
            }
            Err(_) => Err(ServoException::ThreadException {
                message: "servo: the cycle thread panicked".to_string(),
            }),
        }
    }

    /// Pauses or resumes the loop without stopping the cycle thread.
    ///
    /// While paused the loop only tracks the joint state.
    pub fn set_paused(&self, paused: bool) {
        self.input.set_paused(paused);
    }

    pub fn state(&self) -> ServoState {
        if self.handle.is_none() {
            ServoState::Stopped
        } else if self.input.is_paused() {
            ServoState::Paused
        } else if self.input.is_waiting_for_command() {
            ServoState::WaitingForCommand
        } else {
            ServoState::Active
        }
    }

    /// Cached transform from the planning frame to the robot link command frame, `None` until
    /// the first cycle computed it.
    pub fn command_frame_transform(&self) -> Option<Isometry3<f64>> {
        self.input.command_frame_transform()
    }

    /// Latest measured joint state, `None` before the first one arrived.
    pub fn latest_joint_state(&self) -> Option<Arc<JointStateMessage>> {
        self.input.latest_joint_state()
    }

    /// Blocks until a joint state has arrived or `timeout` expired.
    /// # Return
    /// true if a joint state is available.
    pub fn wait_for_initialized(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.input.latest_joint_state().is_some() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(INITIALIZATION_POLL_PERIOD.min(deadline - now));
        }
    }

    /// The cycle state, only available while the loop is stopped.
    pub fn calcs(&self) -> Option<&ServoCalcs<M, O>> {
        self.calcs.as_ref()
    }
}

impl<M: KinematicModel + 'static, O: ServoOutput + 'static> Drop for Servo<M, O> {
    fn drop(&mut self) {
        if let Err(error) = self.stop() {
            warn!("{}", error);
        }
    }
}

/// Runs cycles until a stop is requested.
///
/// Every cycle starts one period after the previous one started. A cycle which overruns is
/// followed by the next one right away; cycles never overlap.
fn run_cycles<M: KinematicModel, O: ServoOutput>(
    calcs: &mut ServoCalcs<M, O>,
    period: Duration,
    stop_requested: &AtomicBool,
) {
    let mut next_cycle = Instant::now();
    while !stop_requested.load(Ordering::Acquire) {
        calcs.tick(stop_requested);
        next_cycle += period;
        let now = Instant::now();
        if next_cycle > now {
            spin_sleep::sleep(next_cycle - now);
        } else {
            debug!("Servo cycle overran its period by {:?}", now - next_cycle);
            next_cycle = now;
        }
    }
}
