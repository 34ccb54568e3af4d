//! WiFi association seam
//!
//! Joining the drone's access point is platform glue. The library only needs
//! to ask whether the link is up and to request (dis)association.

use crate::Result;

/// Narrow view of the WiFi link to the drone's access point.
#[async_trait::async_trait]
pub trait WifiLink: Send + Sync {
    async fn is_connected(&self) -> bool;

    /// Join the drone's network.
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

/// A link that is always up, for wired setups and simulators.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlreadyConnected;

#[async_trait::async_trait]
impl WifiLink for AlreadyConnected {
    async fn is_connected(&self) -> bool {
        true
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}
