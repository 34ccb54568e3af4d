//! Drone connection: the composition root
//!
//! A [`DroneConnection`] owns every task the library runs for one drone: the
//! command session, the telemetry listener, the video pipeline and the
//! recorder. One root cancellation token covers all of them, so dropping the
//! connection tears everything down.

use futures::Stream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DroneConfig;
use crate::recorder::{Recorder, RecordingSummary};
use crate::session::CommandSession;
use crate::stream::frame_stream;
use crate::telemetry::TelemetryListener;
use crate::transport::{DatagramTransport, UdpEndpoint};
use crate::types::{DecodedFrame, TelemetrySnapshot, UpdateRate};
use crate::video::{DecoderBackend, DecoderStats, VideoDecoder, VideoPipeline};
use crate::{DroneError, Result};

/// The three endpoints a connection talks through.
///
/// Normally built from [`NetworkConfig`](crate::config::NetworkConfig) as UDP
/// sockets; supply your own to run against a simulator or in-memory link.
pub struct Transports {
    pub command: Arc<dyn DatagramTransport>,
    pub telemetry: Arc<dyn DatagramTransport>,
    pub video: Arc<dyn DatagramTransport>,
}

impl Transports {
    /// Open the drone's UDP endpoints as described by `config`.
    pub async fn udp(config: &DroneConfig, cancel: &CancellationToken) -> Result<Self> {
        let network = &config.network;

        let command = UdpEndpoint::connect(&network.drone_host, network.command_port)
            .await?
            .with_max_datagram(network.max_datagram_size)
            .with_cancellation(cancel.child_token());
        let telemetry = UdpEndpoint::listen(&network.listen_host, network.telemetry_port)
            .await?
            .with_max_datagram(network.max_datagram_size)
            .with_cancellation(cancel.child_token());
        let video = UdpEndpoint::listen(&network.listen_host, network.video_port)
            .await?
            .with_max_datagram(network.max_datagram_size)
            .with_cancellation(cancel.child_token());

        Ok(Self { command: Arc::new(command), telemetry: Arc::new(telemetry), video: Arc::new(video) })
    }
}

/// Builder for [`DroneConnection`].
pub struct ConnectionBuilder {
    config: DroneConfig,
    backend: Option<Box<dyn DecoderBackend>>,
    transports: Option<Transports>,
}

impl ConnectionBuilder {
    pub fn new(config: DroneConfig) -> Self {
        Self { config, backend: None, transports: None }
    }

    /// Decode video with `backend`.
    ///
    /// Without a backend the video port is left alone and no frames are
    /// produced, unless the `openh264` feature supplies a default one.
    pub fn decoder(mut self, backend: impl DecoderBackend) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    /// Use these endpoints instead of opening UDP sockets.
    pub fn transports(mut self, transports: Transports) -> Self {
        self.transports = Some(transports);
        self
    }

    /// Validate the configuration, open the endpoints and start every task.
    pub async fn connect(self) -> Result<DroneConnection> {
        self.config.validate()?;
        let cancel = CancellationToken::new();

        let transports = match self.transports {
            Some(transports) => transports,
            None => Transports::udp(&self.config, &cancel).await?,
        };

        let session = CommandSession::start(
            transports.command.clone(),
            self.config.command.clone(),
            cancel.child_token(),
        );
        let telemetry = TelemetryListener::start(transports.telemetry.clone(), cancel.child_token());
        let recorder = Recorder::new(self.config.recording.clone());

        let video = match self.backend.or_else(default_backend) {
            Some(backend) => {
                info!(backend = backend.name(), "Starting video pipeline");
                let decoder = VideoDecoder::new(backend).with_recorder(recorder.clone());
                Some(VideoPipeline::start(
                    transports.video.clone(),
                    &self.config.video,
                    decoder,
                    cancel.child_token(),
                ))
            }
            None => {
                debug!("No decoder backend, video disabled");
                transports.video.cancel();
                None
            }
        };

        info!(peer = ?transports.command.peer(), "Drone connection established");

        Ok(DroneConnection {
            session,
            telemetry,
            video,
            recorder,
            transports,
            stream_fps: f64::from(self.config.video.frame_rate),
            cancel,
        })
    }
}

#[cfg(feature = "openh264")]
fn default_backend() -> Option<Box<dyn DecoderBackend>> {
    Some(Box::new(crate::video::OpenH264Backend::new()))
}

#[cfg(not(feature = "openh264"))]
fn default_backend() -> Option<Box<dyn DecoderBackend>> {
    None
}

/// A live connection to one drone.
pub struct DroneConnection {
    session: CommandSession,
    telemetry: TelemetryListener,
    video: Option<VideoPipeline>,
    recorder: Recorder,
    transports: Transports,
    stream_fps: f64,
    cancel: CancellationToken,
}

impl DroneConnection {
    pub fn builder(config: DroneConfig) -> ConnectionBuilder {
        ConnectionBuilder::new(config)
    }

    /// Command channel: flight commands, joystick input and arming state.
    pub fn session(&self) -> &CommandSession {
        &self.session
    }

    /// Latest battery percentage text, if reported yet.
    pub fn battery(&self) -> Option<String> {
        self.telemetry.battery()
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot()
    }

    /// Telemetry snapshots as they change.
    pub fn telemetry_updates(&self) -> impl Stream<Item = TelemetrySnapshot> + 'static {
        self.telemetry.updates()
    }

    /// Whether a video pipeline is running.
    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    /// Most recent decoded picture.
    pub fn latest_frame(&self) -> Option<Arc<DecodedFrame>> {
        let frames = self.video.as_ref()?.frames();
        let latest = frames.borrow().clone();
        latest
    }

    /// Raw latest-frame channel for consumers that poll.
    pub fn frames(&self) -> Result<watch::Receiver<Option<Arc<DecodedFrame>>>> {
        self.video
            .as_ref()
            .map(VideoPipeline::frames)
            .ok_or_else(|| DroneError::NotConnected { operation: "stream video frames".to_string() })
    }

    /// Subscribe to decoded pictures, at most `rate` per second.
    ///
    /// Slow subscribers skip frames; they never hold up decoding.
    pub fn subscribe_frames(
        &self,
        rate: UpdateRate,
    ) -> Result<impl Stream<Item = Arc<DecodedFrame>> + Send + 'static> {
        let frames = self.frames()?;
        debug!(?rate, "New frame subscription");
        Ok(frame_stream(frames, rate, self.stream_fps))
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    /// Start recording the video stream to a new MP4 file.
    pub fn start_recording(&self) -> Result<PathBuf> {
        if self.video.is_none() {
            return Err(DroneError::NotConnected { operation: "record video".to_string() });
        }
        self.recorder.start()
    }

    /// Save the most recent decoded picture as a PNG in `dir`.
    ///
    /// Uses the recording file prefix with a `_<MM-DD>_<HH-MM-SS>.png` suffix.
    pub fn capture_photo(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let frame = self
            .latest_frame()
            .ok_or_else(|| DroneError::NotConnected { operation: "capture a photo".to_string() })?;
        self.recorder.capture_photo(&frame, dir.as_ref())
    }

    /// Finish the current recording.
    pub async fn stop_recording(&self) -> Result<RecordingSummary> {
        self.recorder.stop().await
    }

    /// Stop every task and wait for the decoder to finish.
    ///
    /// The decoder drains before an active recording is finalized, so every
    /// decoded picture makes it into the file.
    pub async fn disconnect(mut self) -> Result<Disconnected> {
        info!("Disconnecting from drone");
        self.session.shutdown();
        self.telemetry.stop();

        let decoder = match self.video.take() {
            Some(video) => Some(video.shutdown().await?),
            None => None,
        };

        let recording = if self.recorder.is_recording() {
            match self.recorder.stop().await {
                Ok(summary) => Some(summary),
                Err(e) => {
                    warn!("Recording could not be finalized: {}", e);
                    None
                }
            }
        } else {
            None
        };

        self.cancel.cancel();
        self.transports.command.cancel();
        self.transports.telemetry.cancel();
        self.transports.video.cancel();
        Ok(Disconnected { decoder, recording })
    }
}

/// What was left running when a connection was closed.
#[derive(Debug)]
pub struct Disconnected {
    /// Decoder counters, if video was running
    pub decoder: Option<DecoderStats>,
    /// The recording finalized on the way out
    pub recording: Option<RecordingSummary>,
}

impl Drop for DroneConnection {
    fn drop(&mut self) {
        debug!("Dropping drone connection");
        self.cancel.cancel();
    }
}
