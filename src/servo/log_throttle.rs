// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains a time-windowed gate for log messages which would otherwise repeat every cycle.
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Lets a message with a given key through at most once per window.
/// ```
/// # use servo::LogThrottle;
/// # use std::time::Duration;
/// let mut throttle = LogThrottle::new(Duration::from_secs(30));
/// assert!(throttle.ready("stale_command"));
/// assert!(!throttle.ready("stale_command"));
/// assert!(throttle.ready("unknown_joint"));
/// ```
#[derive(Debug, Clone)]
pub struct LogThrottle {
    window: Duration,
    last_emitted: HashMap<&'static str, Instant>,
}

impl LogThrottle {
    pub fn new(window: Duration) -> Self {
        LogThrottle {
            window,
            last_emitted: HashMap::new(),
        }
    }

    /// Returns true if the message `key` may be logged now and starts a new window for it.
    pub fn ready(&mut self, key: &'static str) -> bool {
        let now = Instant::now();
        match self.last_emitted.get(key) {
            Some(last) if now.duration_since(*last) < self.window => false,
            _ => {
                self.last_emitted.insert(key, now);
                true
            }
        }
    }
}
