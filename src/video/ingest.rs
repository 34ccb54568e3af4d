//! Video ingest: receive loop, reassembly and the decoder worker

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::decoder::{DecoderStats, VideoDecoder};
use super::reassembly::FrameAssembler;
use crate::config::VideoConfig;
use crate::driver::{DatagramHandler, Driver, Flow};
use crate::transport::DatagramTransport;
use crate::types::DecodedFrame;
use crate::{DroneError, Result};

/// Running video pipeline.
///
/// The receive loop reassembles datagrams into access units and hands them,
/// in arrival order, to a decoder running on the blocking pool. When the
/// decoder falls behind the hand-off waits, and the socket buffer absorbs or
/// drops the excess.
pub struct VideoPipeline {
    frames: watch::Receiver<Option<Arc<DecodedFrame>>>,
    worker: JoinHandle<DecoderStats>,
    cancel: CancellationToken,
}

impl VideoPipeline {
    /// Start ingesting from an endpoint bound to the video port.
    pub fn start(
        transport: Arc<dyn DatagramTransport>,
        config: &VideoConfig,
        decoder: VideoDecoder,
        cancel: CancellationToken,
    ) -> Self {
        let frames = decoder.subscribe();
        let (units_tx, units_rx) = mpsc::channel(config.decode_queue_depth.max(1));

        let worker = {
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || decode_worker(decoder, units_rx, cancel))
        };

        let handler = IngestHandler {
            assembler: FrameAssembler::from_config(config),
            units: units_tx,
            forwarded: 0,
        };
        Driver::spawn("video", transport, handler, cancel.clone());

        Self { frames, worker, cancel }
    }

    /// Latest decoded picture.
    pub fn frames(&self) -> watch::Receiver<Option<Arc<DecodedFrame>>> {
        self.frames.clone()
    }

    /// Stop ingesting and wait for the decoder to wind down.
    pub async fn shutdown(self) -> Result<DecoderStats> {
        self.cancel.cancel();
        self.worker.await.map_err(|e| {
            DroneError::connection_failed_with_source("video decoder worker panicked", Box::new(e))
        })
    }
}

struct IngestHandler {
    assembler: FrameAssembler,
    units: mpsc::Sender<Vec<u8>>,
    forwarded: u64,
}

#[async_trait::async_trait]
impl DatagramHandler for IngestHandler {
    async fn on_datagram(&mut self, datagram: Bytes) -> Flow {
        let Some(unit) = self.assembler.push(&datagram) else {
            return Flow::Continue;
        };

        if self.units.send(unit).await.is_err() {
            debug!("Decoder worker gone, stopping video ingest");
            return Flow::Stop;
        }
        self.forwarded += 1;
        Flow::Continue
    }

    async fn on_shutdown(&mut self) {
        debug!(
            forwarded = self.forwarded,
            pending = self.assembler.pending(),
            dropped = self.assembler.dropped(),
            "Video ingest stopped"
        );
    }
}

fn decode_worker(
    mut decoder: VideoDecoder,
    mut units: mpsc::Receiver<Vec<u8>>,
    cancel: CancellationToken,
) -> DecoderStats {
    while let Some(unit) = units.blocking_recv() {
        // Late units after teardown are not decoded
        if cancel.is_cancelled() {
            break;
        }
        decoder.process(unit);
    }

    let stats = decoder.stats();
    info!(
        units = stats.units,
        frames = stats.frames,
        rejected = stats.rejected,
        decode_failures = stats.decode_failures,
        sessions = stats.sessions_created,
        "Video decoder stopped"
    );
    stats
}
