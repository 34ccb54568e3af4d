//! Joystick movement intent

use serde::{Deserialize, Serialize};

/// Largest magnitude the drone accepts on any `rc` axis.
pub const MAX_AXIS: i32 = 100;

/// Desired velocity on the four control axes.
///
/// Each `rc` command restates the whole vector, so repeated sends are
/// idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MovementVector {
    pub left_right: i32,
    pub forward_back: i32,
    pub up_down: i32,
    pub yaw: i32,
}

impl MovementVector {
    pub const ZERO: MovementVector =
        MovementVector { left_right: 0, forward_back: 0, up_down: 0, yaw: 0 };

    pub fn new(left_right: i32, forward_back: i32, up_down: i32, yaw: i32) -> Self {
        Self { left_right, forward_back, up_down, yaw }
    }

    /// True when every axis is zero.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Limit every axis to `-MAX_AXIS..=MAX_AXIS`.
    pub fn clamped(self) -> Self {
        let clamp = |v: i32| v.clamp(-MAX_AXIS, MAX_AXIS);
        Self {
            left_right: clamp(self.left_right),
            forward_back: clamp(self.forward_back),
            up_down: clamp(self.up_down),
            yaw: clamp(self.yaw),
        }
    }
}
