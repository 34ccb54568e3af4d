//! Text command vocabulary of the control channel

use bytes::Bytes;
use std::fmt;
use std::str::FromStr;

use super::MovementVector;
use crate::DroneError;

/// Flip direction for the `flip` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlipDirection {
    Left,
    Right,
    Forward,
    Back,
}

impl FlipDirection {
    fn code(self) -> char {
        match self {
            FlipDirection::Left => 'l',
            FlipDirection::Right => 'r',
            FlipDirection::Forward => 'f',
            FlipDirection::Back => 'b',
        }
    }
}

/// A command understood by the drone.
///
/// The wire form is the [`Display`](fmt::Display) rendering encoded as UTF-8,
/// with no framing and no trailing delimiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// `command`: enter the commandable (armed) mode.
    Enter,
    Takeoff,
    Land,
    /// `stop`: hover in place.
    Stop,
    /// `emergency`: cut the motors immediately.
    Emergency,
    StreamOn,
    StreamOff,
    Flip(FlipDirection),
    /// `rc a b c d`: continuous velocity setpoint.
    Rc(MovementVector),
}

impl Command {
    /// UTF-8 payload for the wire.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.to_string())
    }

    /// Movement setpoints are sent continuously and logged at trace level only.
    pub fn is_movement(&self) -> bool {
        matches!(self, Command::Rc(_))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Enter => f.write_str("command"),
            Command::Takeoff => f.write_str("takeoff"),
            Command::Land => f.write_str("land"),
            Command::Stop => f.write_str("stop"),
            Command::Emergency => f.write_str("emergency"),
            Command::StreamOn => f.write_str("streamon"),
            Command::StreamOff => f.write_str("streamoff"),
            Command::Flip(direction) => write!(f, "flip {}", direction.code()),
            Command::Rc(v) => {
                write!(f, "rc {} {} {} {}", v.left_right, v.forward_back, v.up_down, v.yaw)
            }
        }
    }
}

impl FromStr for Command {
    type Err = DroneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_error = || DroneError::Parse {
            context: "command".to_string(),
            details: format!("unrecognised command '{}'", s),
        };

        let mut parts = s.split_whitespace();
        let command = match parts.next().ok_or_else(parse_error)? {
            "command" => Command::Enter,
            "takeoff" => Command::Takeoff,
            "land" => Command::Land,
            "stop" => Command::Stop,
            "emergency" => Command::Emergency,
            "streamon" => Command::StreamOn,
            "streamoff" => Command::StreamOff,
            "flip" => {
                let direction = match parts.next() {
                    Some("l") => FlipDirection::Left,
                    Some("r") => FlipDirection::Right,
                    Some("f") => FlipDirection::Forward,
                    Some("b") => FlipDirection::Back,
                    _ => return Err(parse_error()),
                };
                Command::Flip(direction)
            }
            "rc" => {
                let mut axis = || -> Result<i32, DroneError> {
                    parts.next().and_then(|v| v.parse().ok()).ok_or_else(parse_error)
                };
                let left_right = axis()?;
                let forward_back = axis()?;
                let up_down = axis()?;
                let yaw = axis()?;
                Command::Rc(MovementVector { left_right, forward_back, up_down, yaw })
            }
            _ => return Err(parse_error()),
        };

        if parts.next().is_some() {
            return Err(parse_error());
        }
        Ok(command)
    }
}

/// A reply on the command channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// The single token `ok`.
    Ok,
    /// `error ...` text from the drone.
    Error(String),
    /// Anything else: informational replies such as query answers.
    Other(String),
}

impl Response {
    pub fn parse(payload: &[u8]) -> Self {
        let text = String::from_utf8_lossy(payload);
        let text = text.trim();
        if text == "ok" {
            Response::Ok
        } else if text.starts_with("error") {
            Response::Error(text.to_string())
        } else {
            Response::Other(text.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fixed_vocabulary_renders() {
        let cases = [
            (Command::Enter, "command"),
            (Command::Takeoff, "takeoff"),
            (Command::Land, "land"),
            (Command::Stop, "stop"),
            (Command::Emergency, "emergency"),
            (Command::StreamOn, "streamon"),
            (Command::StreamOff, "streamoff"),
            (Command::Flip(FlipDirection::Left), "flip l"),
            (Command::Flip(FlipDirection::Right), "flip r"),
            (Command::Flip(FlipDirection::Forward), "flip f"),
            (Command::Flip(FlipDirection::Back), "flip b"),
        ];
        for (command, expected) in cases {
            assert_eq!(command.to_string(), expected);
            assert_eq!(&command.to_bytes()[..], expected.as_bytes());
            assert_eq!(expected.parse::<Command>().unwrap(), command);
        }
    }

    #[test]
    fn rejects_unknown_or_trailing_tokens() {
        assert!("hover".parse::<Command>().is_err());
        assert!("flip x".parse::<Command>().is_err());
        assert!("rc 1 2 3".parse::<Command>().is_err());
        assert!("land now".parse::<Command>().is_err());
        assert!("".parse::<Command>().is_err());
    }

    #[test]
    fn responses_classify() {
        assert_eq!(Response::parse(b"ok"), Response::Ok);
        assert_eq!(Response::parse(b"ok\r\n"), Response::Ok);
        assert_eq!(Response::parse(b"error Not joystick"), Response::Error("error Not joystick".into()));
        assert_eq!(Response::parse(b"86"), Response::Other("86".into()));
        assert_eq!(Response::parse(&[0xff, 0xfe]), Response::Other("\u{fffd}\u{fffd}".into()));
    }

    proptest! {
        #[test]
        fn movement_command_format(
            a in -100i32..=100,
            b in -100i32..=100,
            c in -100i32..=100,
            d in -100i32..=100,
        ) {
            let command = Command::Rc(MovementVector::new(a, b, c, d));
            prop_assert_eq!(command.to_string(), format!("rc {} {} {} {}", a, b, c, d));
            prop_assert_eq!(command.to_string().parse::<Command>().unwrap(), command);
        }
    }
}
