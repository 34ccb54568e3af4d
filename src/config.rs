//! Connection, protocol and media configuration.
//!
//! Every address, port, interval and threshold the protocol code uses lives
//! here so the drone can be swapped for a simulator or a test double. The
//! defaults match the drone's published network parameters.
//!
//! Configuration can be written as YAML; every section is optional and any
//! missing field falls back to its default:
//!
//! ```rust
//! use dronelink::DroneConfig;
//!
//! let config = DroneConfig::from_yaml_str(
//!     "network:\n  drone_host: 127.0.0.1\ncommand:\n  idle_interval_ms: 2000\n",
//! )
//! .unwrap();
//! assert_eq!(config.network.drone_host, "127.0.0.1");
//! assert_eq!(config.network.command_port, 8889);
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{DroneError, Result};

/// Top-level configuration for a drone connection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DroneConfig {
    pub network: NetworkConfig,
    pub command: CommandConfig,
    pub video: VideoConfig,
    pub recording: RecordingConfig,
}

/// Network endpoints of the drone and of the local listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the drone accepts commands on.
    pub drone_host: String,
    /// Local address the telemetry and video listeners bind to.
    pub listen_host: String,
    /// Drone command port (commands out, acknowledgements back).
    pub command_port: u16,
    /// Local port the drone broadcasts state to.
    pub telemetry_port: u16,
    /// Local port the drone streams H.264 to.
    pub video_port: u16,
    /// Receive buffer size, must exceed the largest datagram the drone sends.
    pub max_datagram_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            drone_host: "192.168.10.1".to_string(),
            listen_host: "0.0.0.0".to_string(),
            command_port: 8889,
            telemetry_port: 8890,
            video_port: 11111,
            max_datagram_size: 2048,
        }
    }
}

/// Timing of the command session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Interval between `command` retries until the drone acknowledges.
    pub arm_retry_interval_ms: u64,
    /// Broadcast interval while the movement vector is active.
    pub movement_interval_ms: u64,
    /// Keep-alive interval once the broadcaster has downshifted.
    pub idle_interval_ms: u64,
    /// Consecutive all-zero ticks before downshifting to the idle interval.
    pub idle_after_ticks: u32,
    /// Copies of each movement command sent per active tick.
    pub duplicate_sends: usize,
    /// Delay between arming and the automatic `streamon`.
    pub stream_on_delay_ms: u64,
    /// Send `streamon` once the drone is armed.
    pub auto_stream: bool,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            arm_retry_interval_ms: 2000,
            movement_interval_ms: 100,
            idle_interval_ms: 4000,
            idle_after_ticks: 1,
            duplicate_sends: 2,
            stream_on_delay_ms: 1000,
            auto_stream: true,
        }
    }
}

impl CommandConfig {
    pub fn arm_retry_interval(&self) -> Duration {
        Duration::from_millis(self.arm_retry_interval_ms)
    }

    pub fn movement_interval(&self) -> Duration {
        Duration::from_millis(self.movement_interval_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn stream_on_delay(&self) -> Duration {
        Duration::from_millis(self.stream_on_delay_ms)
    }
}

/// Video reassembly and decoding parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Payloads shorter than this close the current access unit.
    pub mtu_threshold: usize,
    /// The accumulator must exceed this before a short payload closes it.
    pub min_access_unit: usize,
    /// Accumulators growing past this are dropped.
    pub max_access_unit: usize,
    /// Access units buffered between ingest and the decoder worker.
    pub decode_queue_depth: usize,
    /// Nominal frame rate of the stream.
    pub frame_rate: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            mtu_threshold: 1460,
            min_access_unit: 40,
            max_access_unit: 1024 * 1024,
            decode_queue_depth: 8,
            frame_rate: 30,
        }
    }
}

/// MP4 recording parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub output_dir: PathBuf,
    pub file_prefix: String,
    /// Target frame rate; each accepted frame advances the timeline by `1 / frame_rate`.
    pub frame_rate: u32,
    /// Track timescale in ticks per second, must be a multiple of `frame_rate`.
    pub timescale: u32,
    /// Samples buffered in front of the muxer before frames are dropped.
    pub queue_depth: usize,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("recordings"),
            file_prefix: "drone".to_string(),
            frame_rate: 30,
            timescale: 90_000,
            queue_depth: 32,
        }
    }
}

impl RecordingConfig {
    /// Duration of one frame in timescale ticks.
    pub fn frame_duration_ticks(&self) -> u32 {
        self.timescale / self.frame_rate.max(1)
    }
}

impl DroneConfig {
    /// Parse and validate a YAML configuration.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: DroneConfig = serde_yaml_ng::from_str(yaml).map_err(|e| DroneError::Parse {
            context: "configuration YAML".to_string(),
            details: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| DroneError::file_error(path.to_path_buf(), e))?;
        Self::from_yaml_str(&yaml)
    }

    /// Render the configuration as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml_ng::to_string(self).map_err(|e| DroneError::Parse {
            context: "configuration YAML".to_string(),
            details: e.to_string(),
        })
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        let command = &self.command;
        if command.arm_retry_interval_ms == 0
            || command.movement_interval_ms == 0
            || command.idle_interval_ms == 0
        {
            return Err(DroneError::config_error("command intervals must be non-zero"));
        }
        if command.duplicate_sends == 0 {
            return Err(DroneError::config_error("duplicate_sends must be at least 1"));
        }
        if command.idle_after_ticks == 0 {
            return Err(DroneError::config_error("idle_after_ticks must be at least 1"));
        }

        let video = &self.video;
        if video.mtu_threshold <= video.min_access_unit {
            return Err(DroneError::config_error(format!(
                "mtu_threshold ({}) must exceed min_access_unit ({})",
                video.mtu_threshold, video.min_access_unit
            )));
        }
        if video.max_access_unit < video.mtu_threshold {
            return Err(DroneError::config_error("max_access_unit must be at least mtu_threshold"));
        }
        if self.network.max_datagram_size < video.mtu_threshold {
            return Err(DroneError::config_error(
                "max_datagram_size must be at least mtu_threshold",
            ));
        }
        if video.decode_queue_depth == 0 || video.frame_rate == 0 {
            return Err(DroneError::config_error("video queue depth and frame rate must be non-zero"));
        }

        let recording = &self.recording;
        if recording.frame_rate == 0 || recording.timescale % recording.frame_rate != 0 {
            return Err(DroneError::config_error(format!(
                "recording timescale {} is not a multiple of frame rate {}",
                recording.timescale, recording.frame_rate
            )));
        }
        if recording.queue_depth == 0 {
            return Err(DroneError::config_error("recording queue_depth must be non-zero"));
        }

        Ok(())
    }

    /// Command endpoint as `host:port`.
    pub fn command_address(&self) -> String {
        format!("{}:{}", self.network.drone_host, self.network.command_port)
    }

    /// Telemetry bind address as `host:port`.
    pub fn telemetry_bind_address(&self) -> String {
        format!("{}:{}", self.network.listen_host, self.network.telemetry_port)
    }

    /// Video bind address as `host:port`.
    pub fn video_bind_address(&self) -> String {
        format!("{}:{}", self.network.listen_host, self.network.video_port)
    }
}
