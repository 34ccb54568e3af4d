//! Error types for drone communication and video processing.
//!
//! Every fallible operation in the crate returns [`DroneError`]. Errors carry
//! structured context and classify themselves as retryable or not, so that
//! background loops can decide whether to keep going.
//!
//! ## Error Categories
//!
//! - **Transport Errors**: address resolution, bind failures and per-call I/O
//! - **Protocol Errors**: unparseable datagrams from the drone
//! - **Decode Errors**: malformed NAL structure, bad parameter sets, decoder status codes
//! - **Recording Errors**: muxer construction and write failures
//! - **Configuration Errors**: invalid or unreadable configuration files
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use dronelink::DroneError;
//!
//! let error = DroneError::connection_failed("drone did not answer");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for drone operations.
pub type Result<T, E = DroneError> = std::result::Result<T, E>;

/// Main error type for drone operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DroneError {
    #[error("Failed to resolve address for {host}")]
    AddressResolution { host: String },

    #[error("Failed to bind UDP socket on {address}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to connect to drone: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("I/O error during {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Not connected, cannot {operation}")]
    NotConnected { operation: String },

    #[error("Endpoint was cancelled")]
    Cancelled,

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("Malformed NAL unit: {reason}")]
    MalformedNal { reason: String },

    #[error("Invalid parameter sets: {reason}")]
    FormatDescription { reason: String },

    #[error("Decoder returned status {status}: {message}")]
    Decoder { status: i32, message: String },

    #[error("Recording failed: {reason}")]
    Recording {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("File error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },
}

impl DroneError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            DroneError::Connection { .. } => true,
            DroneError::Io { .. } => true,
            DroneError::NotConnected { .. } => true,
            DroneError::Timeout { .. } => true,
            DroneError::Decoder { .. } => true,
            DroneError::AddressResolution { .. } => false,
            DroneError::Bind { .. } => false,
            DroneError::Cancelled => false,
            DroneError::Parse { .. } => false,
            DroneError::MalformedNal { .. } => false,
            DroneError::FormatDescription { .. } => false,
            DroneError::Recording { .. } => false,
            DroneError::File { .. } => false,
            DroneError::Config { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            DroneError::AddressResolution { .. } => vec![
                "Check the configured drone host",
                "Verify the address is a literal IPv4 address or resolvable name",
            ],
            DroneError::Bind { .. } => vec![
                "Check that no other application is using the port",
                "Verify the configured listen address exists on this host",
            ],
            DroneError::Connection { .. } => vec![
                "Ensure the device is joined to the drone's WiFi network",
                "Power-cycle the drone and retry",
                "Move closer to the drone",
            ],
            DroneError::Io { .. } => vec![
                "Retry the operation",
                "Check the WiFi link to the drone",
            ],
            DroneError::NotConnected { .. } => vec![
                "Wait for the drone to send its first datagram",
                "Verify the drone was told to start streaming",
            ],
            DroneError::Cancelled => vec!["Open a new connection to the drone"],
            DroneError::Parse { .. } => vec![
                "Check drone firmware compatibility",
                "Verify source data integrity",
            ],
            DroneError::MalformedNal { .. } => vec![
                "Wait for the next keyframe",
                "Check for packet loss on the video link",
            ],
            DroneError::FormatDescription { .. } => vec![
                "Wait for the next SPS/PPS pair",
                "Restart the video stream",
            ],
            DroneError::Decoder { .. } => vec![
                "Wait for the next keyframe",
                "Restart the video stream",
            ],
            DroneError::Recording { .. } => vec![
                "Check free disk space",
                "Verify the recording directory is writable",
                "Stop and restart the recording",
            ],
            DroneError::File { .. } => vec![
                "Check file exists and is readable",
                "Check file permissions",
            ],
            DroneError::Config { .. } => vec![
                "Check the configuration file syntax",
                "Compare against the default configuration",
            ],
            DroneError::Timeout { .. } => vec![
                "Increase timeout duration",
                "Verify the drone is powered on and in range",
            ],
        }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        DroneError::Connection { reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with source.
    pub fn connection_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        DroneError::Connection { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for I/O errors with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        DroneError::Io { context: context.into(), source }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        DroneError::File { path, source }
    }

    /// Helper constructor for malformed NAL structure.
    pub fn malformed_nal(reason: impl Into<String>) -> Self {
        DroneError::MalformedNal { reason: reason.into() }
    }

    /// Helper constructor for rejected parameter sets.
    pub fn format_description(reason: impl Into<String>) -> Self {
        DroneError::FormatDescription { reason: reason.into() }
    }

    /// Helper constructor for recording failures.
    pub fn recording_failed(reason: impl Into<String>) -> Self {
        DroneError::Recording { reason: reason.into(), source: None }
    }

    /// Helper constructor for recording failures with source.
    pub fn recording_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        DroneError::Recording { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for configuration errors.
    pub fn config_error(reason: impl Into<String>) -> Self {
        DroneError::Config { reason: reason.into() }
    }
}

impl From<std::io::Error> for DroneError {
    fn from(err: std::io::Error) -> Self {
        DroneError::Io { context: "<unknown>".to_string(), source: err }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[cfg(test)]
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn error_messages_format_correctly_with_arbitrary_context(
            reason in ".*",
            host in "[a-z0-9.]+",
            status in i32::MIN..i32::MAX,
            details in ".*"
          ) {
            let connection_error = DroneError::connection_failed(reason.clone());
            let resolve_error = DroneError::AddressResolution { host: host.clone() };
            let decoder_error = DroneError::Decoder { status, message: details.clone() };
            let nal_error = DroneError::malformed_nal(details.clone());

            let connection_msg = connection_error.to_string();
            prop_assert!(connection_msg.contains(&reason));

            prop_assert!(resolve_error.to_string().contains(&host));

            let decoder_msg = decoder_error.to_string();
            prop_assert!(decoder_msg.contains(&status.to_string()));
            prop_assert!(decoder_msg.contains(&details));

            prop_assert!(nal_error.to_string().contains(&details));
          }

          #[test]
          fn io_conversion_preserves_message(message in ".*") {
            let io_err = std::io::Error::other(message.clone());
            let converted: DroneError = io_err.into();
            match converted {
              DroneError::Io { source, .. } => {
                prop_assert_eq!(source.to_string(), message);
              }
              _ => prop_assert!(false, "Expected Io error from io::Error conversion"),
            }
          }

          #[test]
          fn error_source_chaining_preserves_information(
            base_message in ".*",
            intermediate_reasons in prop::collection::vec(".*", 1..5)
          ) {
            let mut current_error: Box<dyn std::error::Error + Send + Sync> =
              Box::new(std::io::Error::other(base_message.clone()));

            for (i, reason) in intermediate_reasons.iter().enumerate() {
              current_error = Box::new(DroneError::connection_failed_with_source(
                format!("Level {}: {}", i, reason),
                current_error,
              ));
            }

            let mut traversed = 0;
            let mut found_base = false;
            let mut current: Option<&(dyn std::error::Error + 'static)> = Some(current_error.as_ref());
            while let Some(err) = current {
              if err.to_string().contains(&base_message) {
                found_base = true;
              }
              current = err.source();
              traversed += 1;
              if traversed > 10 {
                break;
              }
            }

            prop_assert_eq!(traversed, intermediate_reasons.len() + 1);
            prop_assert!(found_base, "Base message '{}' not found in chain", base_message);
          }
        }
    }

    #[test]
    fn error_constructors_validation() {
        let file_error = DroneError::file_error(
            PathBuf::from("/test"),
            std::io::Error::new(std::io::ErrorKind::NotFound, "test"),
        );
        assert!(matches!(file_error, DroneError::File { .. }));

        let conn_error = DroneError::connection_failed("test");
        assert!(matches!(conn_error, DroneError::Connection { .. }));

        let rec_error = DroneError::recording_failed("disk full");
        assert!(matches!(rec_error, DroneError::Recording { .. }));
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<DroneError>();

        let error = DroneError::Cancelled;
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn recovery_methods_work() {
        let io_error = DroneError::io("send", std::io::Error::other("network down"));
        let bind_error = DroneError::Bind {
            address: "0.0.0.0:8890".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        let nal_error = DroneError::malformed_nal("no start code");

        // Per-call transport failures are transient, construction failures are not
        assert!(io_error.is_retryable());
        assert!(!bind_error.is_retryable());
        assert!(!nal_error.is_retryable());
        assert!(!DroneError::Cancelled.is_retryable());

        for error in [&io_error, &bind_error, &nal_error] {
            let suggestions = error.recovery_suggestions();
            assert!(!suggestions.is_empty());
            for suggestion in suggestions {
                assert!(suggestion.len() > 5);
            }
        }
    }
}
