//! Driver spawns and manages datagram receive loops

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::DroneError;
use crate::transport::DatagramTransport;

/// What a handler wants the loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Consumer of the datagrams read by a receive loop.
///
/// Handlers never fail: a datagram that cannot be used is logged and
/// dropped inside the handler so the loop can carry on with the next one.
#[async_trait::async_trait]
pub trait DatagramHandler: Send + 'static {
    async fn on_datagram(&mut self, datagram: Bytes) -> Flow;

    /// Called once when the loop exits, for any reason.
    async fn on_shutdown(&mut self) {}
}

/// Driver spawns receive loops that outlive transient transport failures
///
/// Each loop owns one endpoint's receive side, waits for datagrams and hands
/// them to its handler in arrival order. Errors back off exponentially and the
/// loop keeps going; only cancellation (of the token or of the endpoint) or a
/// handler asking to stop ends it.
pub struct Driver;

impl Driver {
    /// Spawn a receive loop on the current runtime
    pub fn spawn<H>(
        name: &'static str,
        transport: Arc<dyn DatagramTransport>,
        handler: H,
        cancel: CancellationToken,
    ) -> JoinHandle<()>
    where
        H: DatagramHandler,
    {
        tokio::spawn(async move {
            Self::receive_loop(name, transport, handler, cancel).await;
        })
    }

    async fn receive_loop<H>(
        name: &'static str,
        transport: Arc<dyn DatagramTransport>,
        mut handler: H,
        cancel: CancellationToken,
    ) where
        H: DatagramHandler,
    {
        info!(loop_name = name, "Receive loop started");
        let mut datagrams = 0u64;
        let mut error_count = 0u32;

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(loop_name = name, "Receive loop cancelled");
                    break;
                }
                result = transport.recv() => result,
            };

            match result {
                Ok(datagram) => {
                    datagrams += 1;
                    error_count = 0;
                    trace!(loop_name = name, len = datagram.len(), "Datagram {}", datagrams);

                    if handler.on_datagram(datagram).await == Flow::Stop {
                        debug!(loop_name = name, "Handler requested stop");
                        break;
                    }
                }
                Err(DroneError::Cancelled) => {
                    debug!(loop_name = name, "Endpoint cancelled");
                    break;
                }
                Err(e) => {
                    // Transient receive failure, the endpoint stays usable
                    error_count = error_count.saturating_add(1);
                    if error_count == 1 || error_count % 10 == 0 {
                        warn!(loop_name = name, errors = error_count, "Receive failed: {}", e);
                    }

                    let backoff = backoff_for(error_count);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        // Release the socket for everyone sharing this endpoint
        transport.cancel();
        handler.on_shutdown().await;
        info!(loop_name = name, datagrams, "Receive loop ended");
    }
}

/// Exponential backoff: 50ms, 100ms, 200ms, ... capped at 1.6s.
fn backoff_for(error_count: u32) -> Duration {
    Duration::from_millis(50 * (1 << error_count.saturating_sub(1).min(5)))
}
