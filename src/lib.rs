//! Async control, telemetry and video library for WiFi quadcopters.
//!
//! dronelink speaks the drone's UDP text protocol and turns its raw H.264
//! stream into displayable frames.
//!
//! # Features
//!
//! - **Command session**: arming handshake, ordered command queue and a
//!   continuous joystick broadcast with idle keep-alive
//! - **Telemetry**: latest-value view of the drone's state broadcast
//! - **Video**: datagram reassembly, Annex-B parsing, decompression session
//!   management behind a pluggable decoder backend
//! - **Recording**: MP4 capture of the coded stream
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use dronelink::{Drone, DroneConfig, MovementVector, UpdateRate};
//! use futures::StreamExt;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> dronelink::Result<()> {
//!     let drone = Drone::connect(DroneConfig::default()).await?;
//!     drone.session().wait_armed(Duration::from_secs(10)).await?;
//!
//!     drone.session().takeoff()?;
//!     drone.session().set_movement(MovementVector::new(0, 30, 0, 0));
//!
//!     if let Ok(frames) = drone.subscribe_frames(UpdateRate::Max(15)) {
//!         let mut frames = Box::pin(frames);
//!         while let Some(frame) = frames.next().await {
//!             println!("{}x{} #{}", frame.width, frame.height, frame.sequence);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod config;
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Protocol plumbing
pub mod driver;
pub mod transport;
pub mod wifi;

// Components
pub mod connection;
pub mod recorder;
pub mod session;
pub mod stream;
pub mod telemetry;
pub mod video;

// Core exports
pub use config::DroneConfig;
pub use error::*;
pub use types::*;

// Main API exports
pub use connection::{ConnectionBuilder, Disconnected, DroneConnection, Transports};
pub use recorder::{Recorder, RecordingSummary};
pub use session::{CommandSession, SessionState};
pub use telemetry::TelemetryListener;
pub use transport::{DatagramTransport, MemoryTransport, UdpEndpoint};
pub use video::{DecoderBackend, DecompressionSession, FormatDescription, VideoDecoder};
pub use wifi::{AlreadyConnected, WifiLink};

#[cfg(feature = "openh264")]
pub use video::OpenH264Backend;

use tracing::info;

/// Unified entry point for drone connections.
///
/// # Examples
///
/// ```rust,no_run
/// use dronelink::{Drone, DroneConfig};
///
/// #[tokio::main]
/// async fn main() -> dronelink::Result<()> {
///     let config = DroneConfig::load("drone.yaml")?;
///     let drone = Drone::connect(config).await?;
///     println!("battery: {:?}", drone.battery());
///     Ok(())
/// }
/// ```
pub struct Drone;

impl Drone {
    /// Connect to the drone with UDP endpoints built from `config`.
    ///
    /// Video is decoded with the bundled software decoder when the
    /// `openh264` feature is enabled; use [`Drone::builder`] to supply a
    /// platform decoder instead.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration does not validate
    /// - The drone address cannot be resolved
    /// - A local port cannot be bound
    pub async fn connect(config: DroneConfig) -> Result<DroneConnection> {
        ConnectionBuilder::new(config).connect().await
    }

    /// Join the drone's WiFi network if needed, then connect.
    pub async fn connect_via(link: &dyn WifiLink, config: DroneConfig) -> Result<DroneConnection> {
        if !link.is_connected().await {
            info!("Joining drone network");
            link.connect().await?;
        }
        if !link.is_connected().await {
            return Err(DroneError::NotConnected { operation: "join drone network".to_string() });
        }
        Self::connect(config).await
    }

    /// Builder for connections with a custom decoder or transports.
    pub fn builder(config: DroneConfig) -> ConnectionBuilder {
        ConnectionBuilder::new(config)
    }
}
