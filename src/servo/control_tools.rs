// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains helpers for running the cycle thread with realtime priority.
use std::path::Path;

use crate::exception::{ServoException, ServoResult};

/// Used to decide whether to enforce realtime mode for the servo cycle thread.
/// see [`Servo`](`crate::Servo`)
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RealtimeConfig {
    Enforce,
    Ignore,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        RealtimeConfig::Ignore
    }
}

/// Determines whether the current OS kernel is a realtime kernel.
///
/// On Linux, this checks for the existence of `/sys/kernel/realtime`.
pub fn has_realtime_kernel() -> bool {
    Path::new("/sys/kernel/realtime").exists()
}

/// Sets the current thread to the highest possible scheduler priority.
///
/// # Errors
/// * RealTimeException if realtime priority cannot be set for the current thread.
///
/// If the method returns an Error please check your /etc/security/limits.conf file
/// There should be a line like this:
/// ```text
///servo            -       rtprio          99
/// ```
pub fn set_current_thread_to_highest_scheduler_priority() -> ServoResult<()> {
    unsafe {
        let max_priority = libc::sched_get_priority_max(libc::SCHED_FIFO);
        if max_priority == -1 {
            return Err(ServoException::RealTimeException {
                message: "servo: unable to get maximum possible thread priority".to_string(),
            });
        }
        let thread_param = libc::sched_param {
            // one below the maximum, see
            // https://rt.wiki.kernel.org/index.php/HOWTO:_Build_an_RT-application
            sched_priority: max_priority - 1,
        };
        if libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &thread_param) != 0 {
            return Err(ServoException::RealTimeException {
                message: "servo: unable to set realtime scheduling".to_string(),
            });
        }
        // keep the cycle thread from being swapped out
        if libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) != 0 {
            return Err(ServoException::RealTimeException {
                message: "servo: unable to lock memory".to_string(),
            });
        }
    }
    Ok(())
}

/// Prepares the calling thread as the cycle thread.
///
/// With [`RealtimeConfig::Enforce`] the kernel has to be a realtime kernel and the thread is raised
/// to the highest SCHED_FIFO priority. With [`RealtimeConfig::Ignore`] nothing happens.
/// # Errors
/// * RealTimeException if realtime mode is enforced but not available.
pub fn prepare_cycle_thread(realtime_config: RealtimeConfig) -> ServoResult<()> {
    match realtime_config {
        RealtimeConfig::Ignore => Ok(()),
        RealtimeConfig::Enforce => {
            if has_realtime_kernel() {
                set_current_thread_to_highest_scheduler_priority()
            } else {
                Err(ServoException::RealTimeException {
                    message: "servo: Running kernel does not have realtime capabilities."
                        .to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignore_never_fails() {
        assert!(prepare_cycle_thread(RealtimeConfig::Ignore).is_ok());
        assert_eq!(RealtimeConfig::default(), RealtimeConfig::Ignore);
    }
}
