//! Access unit decoding and parameter set tracking

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use super::backend::{DecoderBackend, DecompressionSession, EncodedSample};
use super::format::FormatDescription;
use super::nal::AccessUnit;
use crate::Result;
use crate::recorder::Recorder;
use crate::types::DecodedFrame;

/// What became of one access unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    /// Discarded: no parameter sets known yet and the unit carries none.
    AwaitingParameters,
    /// Aborted: malformed structure, rejected parameter sets or no session.
    Rejected,
    /// Parameter sets applied; the unit carried no picture.
    ParametersOnly,
    /// Nothing to decode in this unit.
    NoPicture,
    /// A picture was decoded and published.
    Decoded,
    /// The backend reported a failure for this picture.
    DecodeFailed { benign: bool },
}

/// Running counters of a decoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub units: u64,
    pub frames: u64,
    pub rejected: u64,
    pub decode_failures: u64,
    pub sessions_created: u64,
}

/// Turns reassembled access units into published pictures.
///
/// Owns the parameter set state: the current format description and the
/// decompression session bound to it. A session is only rebuilt when a unit
/// carries parameter sets that differ from the current ones.
pub struct VideoDecoder {
    backend: Box<dyn DecoderBackend>,
    format: Option<Arc<FormatDescription>>,
    session: Option<Box<dyn DecompressionSession>>,
    frames: watch::Sender<Option<Arc<DecodedFrame>>>,
    recorder: Option<Recorder>,
    stats: DecoderStats,
}

impl VideoDecoder {
    pub fn new(backend: Box<dyn DecoderBackend>) -> Self {
        let (frames, _) = watch::channel(None);
        Self { backend, format: None, session: None, frames, recorder: None, stats: DecoderStats::default() }
    }

    /// Feed every decoded sample to `recorder` while it is recording.
    pub fn with_recorder(mut self, recorder: Recorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Latest decoded picture.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<DecodedFrame>>> {
        self.frames.subscribe()
    }

    pub fn format(&self) -> Option<&Arc<FormatDescription>> {
        self.format.as_ref()
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Process one reassembled access unit.
    ///
    /// Never fails: problems with a unit are logged and only affect that unit.
    pub fn process(&mut self, buf: Vec<u8>) -> UnitOutcome {
        self.stats.units += 1;
        let sequence = self.stats.units;

        let unit = match AccessUnit::parse(buf, self.format.is_some()) {
            Ok(Some(unit)) => unit,
            Ok(None) => {
                trace!(sequence, "No parameter sets yet, discarding access unit");
                return UnitOutcome::AwaitingParameters;
            }
            Err(e) => {
                self.stats.rejected += 1;
                warn!(sequence, "Access unit aborted: {}", e);
                return UnitOutcome::Rejected;
            }
        };

        let carries_parameters = match unit.parameter_sets() {
            Some((sps, pps)) => {
                if let Err(e) = self.apply_parameters(sps, pps) {
                    self.stats.rejected += 1;
                    warn!(sequence, "Access unit aborted: {}", e);
                    return UnitOutcome::Rejected;
                }
                true
            }
            None => false,
        };

        let Some(data) = unit.picture() else {
            trace!(sequence, first = ?unit.first_type(), "Access unit carries no picture");
            return if carries_parameters { UnitOutcome::ParametersOnly } else { UnitOutcome::NoPicture };
        };

        let (Some(format), Some(session)) = (self.format.clone(), self.session.as_mut()) else {
            trace!(sequence, "No decompression session, picture skipped");
            return UnitOutcome::NoPicture;
        };

        let sample = EncodedSample { data, format, is_sync: unit.is_keyframe(), sequence };
        match session.decode(&sample) {
            Ok(mut frame) => {
                frame.sequence = sequence;
                self.stats.frames += 1;
                trace!(sequence, width = frame.width, height = frame.height, "Frame decoded");
                self.frames.send_replace(Some(Arc::new(frame)));

                if let Some(recorder) = &self.recorder {
                    recorder.append_frame(&sample);
                }
                UnitOutcome::Decoded
            }
            Err(failure) => {
                self.stats.decode_failures += 1;
                let benign = failure.is_benign();
                if benign {
                    trace!(sequence, status = failure.status(), "No picture yet");
                } else {
                    warn!(sequence, status = failure.status(), "Decode failed: {}", failure);
                }
                UnitOutcome::DecodeFailed { benign }
            }
        }
    }

    fn apply_parameters(&mut self, sps: Bytes, pps: Bytes) -> Result<()> {
        let format = FormatDescription::from_parameter_sets(sps, pps)?;

        if self.session.is_some() && self.format.as_deref() == Some(&format) {
            trace!("Parameter sets unchanged");
            return Ok(());
        }

        if let Some(mut previous) = self.session.take() {
            info!("Stream parameters changed, rebuilding decompression session");
            previous.invalidate();
        }

        let format = Arc::new(format);
        self.format = Some(Arc::clone(&format));
        let session = self.backend.create_session(&format)?;
        self.session = Some(session);
        self.stats.sessions_created += 1;

        info!(
            backend = self.backend.name(),
            width = format.width(),
            height = format.height(),
            codec = %format.codec_string(),
            "Decompression session ready"
        );
        Ok(())
    }
}

impl Drop for VideoDecoder {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            debug!("Invalidating decompression session");
            session.invalidate();
        }
    }
}
