// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the controlled joint group and the tracking of its measured state.
use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::servo::log_throttle::LogThrottle;
use crate::utils::JointVector;

/// Measured state of the robot joints, keyed by joint name.
///
/// May contain joints which are not part of the servoed group. `velocity` may be empty if the
/// robot does not report velocities.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JointStateMessage {
    pub name: Vec<String>,
    pub position: Vec<f64>,
    pub velocity: Vec<f64>,
}

impl JointStateMessage {
    pub fn new(name: Vec<String>, position: Vec<f64>, velocity: Vec<f64>) -> Self {
        JointStateMessage {
            name,
            position,
            velocity,
        }
    }
}

/// Ordered names of the servoed joints with a name to index lookup.
///
/// Fixed for the lifetime of a [`Servo`](`crate::Servo`).
#[derive(Debug, Clone, PartialEq)]
pub struct JointSet {
    names: Vec<String>,
    indices: HashMap<String, usize>,
}

impl JointSet {
    pub fn new(names: Vec<String>) -> Self {
        let indices = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        JointSet { names, indices }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Index of `name` in the group, `None` if the joint is not part of it.
    pub fn index(&self, name: &str) -> Option<usize> {
        self.indices.get(name).copied()
    }
}

/// Position and velocity of every joint of a [`JointSet`], in group order.
#[derive(Debug, Clone, PartialEq)]
pub struct JointStateSnapshot {
    pub position: JointVector,
    pub velocity: JointVector,
}

impl JointStateSnapshot {
    pub fn zeros(num_joints: usize) -> Self {
        JointStateSnapshot {
            position: JointVector::zeros(num_joints),
            velocity: JointVector::zeros(num_joints),
        }
    }
}

/// Maps incoming joint state messages into the servoed group.
#[derive(Debug, Clone)]
pub struct JointStateTracker {
    joints: JointSet,
    internal: JointStateSnapshot,
    original: JointStateSnapshot,
    log_throttle: LogThrottle,
}

impl JointStateTracker {
    pub fn new(joints: JointSet, log_throttle_window: Duration) -> Self {
        let num_joints = joints.len();
        JointStateTracker {
            joints,
            internal: JointStateSnapshot::zeros(num_joints),
            original: JointStateSnapshot::zeros(num_joints),
            log_throttle: LogThrottle::new(log_throttle_window),
        }
    }

    /// Copies the servoed joints out of `message`.
    ///
    /// Joints outside of the group are ignored. On success the result also becomes the
    /// [`original`](`Self::original`) snapshot of this cycle. The velocity of the snapshot is the
    /// measured one; joints without a measured velocity keep their last value.
    /// # Return
    /// false if the message names fewer joints than the group has. Nothing is updated then.
    pub fn update_joints(&mut self, message: &JointStateMessage) -> bool {
        if message.name.len() < self.joints.len() {
            return false;
        }
        for (m, name) in message.name.iter().enumerate() {
            let c = match self.joints.index(name) {
                Some(c) => c,
                None => {
                    if self.log_throttle.ready("ignoring_joint") {
                        debug!("Ignoring joint {}", name);
                    }
                    continue;
                }
            };
            if let Some(&position) = message.position.get(m) {
                self.internal.position[c] = position;
            }
            if let Some(&velocity) = message.velocity.get(m) {
                self.internal.velocity[c] = velocity;
            }
        }
        self.original = self.internal.clone();
        true
    }

    /// Unfiltered state captured by the last successful [`update_joints`](`Self::update_joints`).
    pub fn original(&self) -> &JointStateSnapshot {
        &self.original
    }
}
