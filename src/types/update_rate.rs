//! Display rate control for decoded video

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delivery rate for frame subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateRate {
    /// Every decoded frame, at the stream's own rate
    Native,

    /// At most this many frames per second, latest frame wins
    /// A cap at or above the stream rate behaves like Native
    Max(u32),
}

impl UpdateRate {
    /// Resolve the requested rate against the stream's nominal frame rate
    pub fn normalize(self, stream_fps: f64) -> Self {
        match self {
            UpdateRate::Native => UpdateRate::Native,
            UpdateRate::Max(0) => UpdateRate::Native,
            UpdateRate::Max(hz) if hz as f64 >= stream_fps => UpdateRate::Native,
            UpdateRate::Max(hz) => UpdateRate::Max(hz),
        }
    }

    /// Minimum spacing between delivered frames, if throttled
    pub fn throttle_interval(self, stream_fps: f64) -> Option<Duration> {
        match self.normalize(stream_fps) {
            UpdateRate::Native => None,
            UpdateRate::Max(hz) => Some(Duration::from_secs_f64(1.0 / hz as f64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_above_stream_rate_are_native() {
        assert_eq!(UpdateRate::Max(60).normalize(30.0), UpdateRate::Native);
        assert_eq!(UpdateRate::Max(30).normalize(30.0), UpdateRate::Native);
        assert_eq!(UpdateRate::Max(0).normalize(30.0), UpdateRate::Native);
        assert_eq!(UpdateRate::Max(10).normalize(30.0), UpdateRate::Max(10));
    }

    #[test]
    fn throttle_interval_matches_cap() {
        assert_eq!(UpdateRate::Native.throttle_interval(30.0), None);
        assert_eq!(UpdateRate::Max(10).throttle_interval(30.0), Some(Duration::from_millis(100)));
    }
}
