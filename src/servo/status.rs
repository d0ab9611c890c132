// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later
//! Defines the status codes published once per servo cycle.
use std::fmt::{Display, Formatter, Result};

use num_derive::{FromPrimitive, ToPrimitive};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Worst condition found during one servo cycle.
#[derive(Serialize_repr, Deserialize_repr, Debug, PartialEq, Eq, Copy, Clone)]
#[repr(i8)]
#[derive(FromPrimitive, ToPrimitive)]
pub enum StatusCode {
    /// Nothing restricted the motion.
    Ok = 0,
    /// Close to a singularity, velocity is scaled down.
    DecelerateForSingularity = 1,
    /// Very close to a singularity, motion is stopped.
    HaltForSingularity = 2,
    /// Close to a collision, velocity is scaled down.
    DecelerateForCollision = 3,
    /// Collision imminent, motion is stopped.
    HaltForCollision = 4,
    /// A joint is about to leave its position limits, motion is stopped.
    JointBound = 5,
}

impl StatusCode {
    fn severity(self) -> u8 {
        match self {
            StatusCode::Ok => 0,
            StatusCode::DecelerateForSingularity | StatusCode::DecelerateForCollision => 1,
            StatusCode::HaltForSingularity
            | StatusCode::HaltForCollision
            | StatusCode::JointBound => 2,
        }
    }

    /// Returns the more severe of the two codes. On equal severity the newer code wins.
    pub fn worst(self, newer: StatusCode) -> StatusCode {
        if newer.severity() >= self.severity() {
            newer
        } else {
            self
        }
    }

    /// True if the code stops the motion.
    pub fn is_halt(self) -> bool {
        self.severity() == 2
    }
}

impl Default for StatusCode {
    fn default() -> Self {
        StatusCode::Ok
    }
}

impl Display for StatusCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let description = match self {
            StatusCode::Ok => "No warnings",
            StatusCode::DecelerateForSingularity => "Close to a singularity, decelerating",
            StatusCode::HaltForSingularity => "Very close to a singularity, emergency stop",
            StatusCode::DecelerateForCollision => "Close to a collision, decelerating",
            StatusCode::HaltForCollision => "Collision detected, emergency stop",
            StatusCode::JointBound => "Close to a joint bound (position or velocity), halting",
        };
        write!(f, "{}", description)
    }
}

#[cfg(test)]
mod tests {
    use super::StatusCode;
    use num_traits::{FromPrimitive, ToPrimitive};

    #[test]
    fn worst_keeps_halts() {
        let status = StatusCode::Ok
            .worst(StatusCode::DecelerateForSingularity)
            .worst(StatusCode::HaltForCollision)
            .worst(StatusCode::DecelerateForCollision);
        assert_eq!(status, StatusCode::HaltForCollision);
        assert_eq!(
            StatusCode::HaltForSingularity.worst(StatusCode::JointBound),
            StatusCode::JointBound
        );
        assert_eq!(
            StatusCode::DecelerateForCollision.worst(StatusCode::Ok),
            StatusCode::DecelerateForCollision
        );
    }

    #[test]
    fn status_codes_are_small_integers() {
        assert_eq!(StatusCode::JointBound.to_i8(), Some(5));
        assert_eq!(StatusCode::from_i8(2), Some(StatusCode::HaltForSingularity));
        assert_eq!(StatusCode::from_i8(6), None);
        assert!(StatusCode::HaltForCollision.is_halt());
        assert!(!StatusCode::DecelerateForCollision.is_halt());
    }
}
