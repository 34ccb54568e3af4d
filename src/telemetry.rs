//! Telemetry listener: keeps the latest drone state available

use bytes::Bytes;
use futures::Stream;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::driver::{DatagramHandler, Driver, Flow};
use crate::transport::DatagramTransport;
use crate::types::TelemetrySnapshot;

/// Running telemetry receive loop.
///
/// Readers always see the most recently applied snapshot; nothing is queued.
pub struct TelemetryListener {
    snapshot: watch::Receiver<TelemetrySnapshot>,
    cancel: CancellationToken,
}

impl TelemetryListener {
    /// Start listening on an endpoint bound to the telemetry port.
    pub fn start(transport: Arc<dyn DatagramTransport>, cancel: CancellationToken) -> Self {
        let (tx, rx) = watch::channel(TelemetrySnapshot::default());
        Driver::spawn("telemetry", transport, TelemetryHandler { snapshot: tx, applied: 0 }, cancel.clone());
        Self { snapshot: rx, cancel }
    }

    /// Latest battery percentage text, if one has been seen.
    pub fn battery(&self) -> Option<String> {
        self.snapshot.borrow().battery().map(str::to_string)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.snapshot.borrow().clone()
    }

    /// Snapshot changes, starting with the current one.
    pub fn updates(&self) -> impl Stream<Item = TelemetrySnapshot> + 'static {
        WatchStream::new(self.snapshot.clone())
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TelemetryListener {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct TelemetryHandler {
    snapshot: watch::Sender<TelemetrySnapshot>,
    applied: u64,
}

#[async_trait::async_trait]
impl DatagramHandler for TelemetryHandler {
    async fn on_datagram(&mut self, datagram: Bytes) -> Flow {
        let changed = self.snapshot.send_if_modified(|snapshot| snapshot.apply(&datagram));
        if changed {
            self.applied += 1;
            trace!(battery = ?self.snapshot.borrow().battery(), "Telemetry updated");
        }
        Flow::Continue
    }

    async fn on_shutdown(&mut self) {
        debug!(applied = self.applied, "Telemetry listener stopped");
    }
}
