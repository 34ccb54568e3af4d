//! Protocol and media value types.
//!
//! - [`Command`] / [`Response`]: the text vocabulary of the control channel
//! - [`MovementVector`]: joystick intent, restated in full by every `rc` command
//! - [`TelemetrySnapshot`]: latest-value view of the drone's state broadcast
//! - [`DecodedFrame`]: a displayable picture produced by the video pipeline
//! - [`UpdateRate`]: display-rate cap for frame subscriptions
//!
//! ```rust
//! use dronelink::types::{Command, MovementVector};
//!
//! let command = Command::Rc(MovementVector::new(50, 0, -20, 10));
//! assert_eq!(command.to_string(), "rc 50 0 -20 10");
//! ```

mod command;
mod image;
mod movement;
mod telemetry;
mod update_rate;

pub use command::{Command, FlipDirection, Response};
pub use image::DecodedFrame;
pub use movement::{MAX_AXIS, MovementVector};
pub use telemetry::TelemetrySnapshot;
pub use update_rate::UpdateRate;
