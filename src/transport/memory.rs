//! In-process transport for simulators and tests

use bytes::Bytes;
use std::net::SocketAddr;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::DatagramTransport;
use crate::{DroneError, Result};

/// One end of an in-memory datagram link.
///
/// Created in pairs; whatever one end sends, the other receives, in order and
/// without loss. Sending after the other end is gone silently drops the
/// datagram, like UDP to a closed port.
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: Mutex<mpsc::UnboundedReceiver<Bytes>>,
    cancel: CancellationToken,
}

impl MemoryTransport {
    /// Create two linked endpoints.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self { tx: a_tx, rx: Mutex::new(b_rx), cancel: CancellationToken::new() },
            Self { tx: b_tx, rx: Mutex::new(a_rx), cancel: CancellationToken::new() },
        )
    }
}

#[async_trait::async_trait]
impl DatagramTransport for MemoryTransport {
    async fn send(&self, payload: &[u8]) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(DroneError::Cancelled);
        }
        if self.tx.send(Bytes::copy_from_slice(payload)).is_err() {
            trace!("Memory peer gone, datagram dropped");
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Bytes> {
        let mut rx = tokio::select! {
            _ = self.cancel.cancelled() => return Err(DroneError::Cancelled),
            rx = self.rx.lock() => rx,
        };
        tokio::select! {
            _ = self.cancel.cancelled() => Err(DroneError::Cancelled),
            datagram = rx.recv() => datagram.ok_or(DroneError::Cancelled),
        }
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn peer(&self) -> Option<SocketAddr> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_delivers_in_order() {
        let (app, drone) = MemoryTransport::pair();
        app.send(b"command").await.unwrap();
        app.send(b"takeoff").await.unwrap();

        assert_eq!(&drone.recv().await.unwrap()[..], b"command");
        assert_eq!(&drone.recv().await.unwrap()[..], b"takeoff");

        drone.send(b"ok").await.unwrap();
        assert_eq!(&app.recv().await.unwrap()[..], b"ok");
    }

    #[tokio::test]
    async fn dropped_peer_ends_receive_and_swallows_sends() {
        let (app, drone) = MemoryTransport::pair();
        drop(drone);
        assert!(app.send(b"command").await.is_ok());
        assert!(matches!(app.recv().await, Err(DroneError::Cancelled)));
    }

    #[tokio::test]
    async fn cancel_refuses_traffic() {
        let (app, _drone) = MemoryTransport::pair();
        app.cancel();
        assert!(app.is_cancelled());
        assert!(matches!(app.send(b"x").await, Err(DroneError::Cancelled)));
        assert!(matches!(app.recv().await, Err(DroneError::Cancelled)));
    }
}
