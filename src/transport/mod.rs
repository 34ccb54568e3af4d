//! Datagram transport abstraction
//!
//! Every protocol component talks to the drone through [`DatagramTransport`].
//! Two endpoint shapes exist on the wire:
//!
//! - **Connected**: a socket bound to an ephemeral local port and connected to a
//!   fixed peer (the drone's command port).
//! - **Listening**: a socket bound to a well-known local port that adopts the
//!   first peer it hears from and behaves as a connected endpoint afterwards
//!   (telemetry and video broadcasts).
//!
//! Sends are fire-and-forget. A receive suspends until one datagram arrives or
//! the endpoint is cancelled, in which case it resolves to
//! [`DroneError::Cancelled`](crate::DroneError::Cancelled).

use bytes::Bytes;
use std::net::SocketAddr;

use crate::Result;

pub mod memory;
pub mod udp;

pub use memory::MemoryTransport;
pub use udp::UdpEndpoint;

/// How an endpoint acquired its peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointMode {
    /// Peer fixed at construction.
    Connected,
    /// Peer adopted from the first inbound datagram.
    Listening,
}

/// Host, port and mode of an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub mode: EndpointMode,
}

impl Endpoint {
    pub fn connected(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port, mode: EndpointMode::Connected }
    }

    pub fn listening(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port, mode: EndpointMode::Listening }
    }

    /// `host:port` form suitable for resolution.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A bidirectional, unreliable datagram channel to one peer.
///
/// Implementations must be usable from several tasks at once: the command
/// session sends from its queue task while a separate task waits for
/// acknowledgements on the same endpoint.
#[async_trait::async_trait]
pub trait DatagramTransport: Send + Sync + 'static {
    /// Send one datagram. No delivery guarantee.
    async fn send(&self, payload: &[u8]) -> Result<()>;

    /// Wait for the next datagram.
    ///
    /// Returns:
    /// - `Ok(bytes)` - One complete datagram
    /// - `Err(DroneError::Cancelled)` - The endpoint was cancelled
    /// - `Err(e)` - Transient failure, the endpoint stays usable
    async fn recv(&self) -> Result<Bytes>;

    /// Cancel the endpoint, unblocking any pending receive.
    fn cancel(&self);

    /// Whether [`cancel`](DatagramTransport::cancel) has been called.
    fn is_cancelled(&self) -> bool;

    /// Current peer, if one is known.
    fn peer(&self) -> Option<SocketAddr>;
}
