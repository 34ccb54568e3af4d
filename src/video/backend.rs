//! Decoder backend seam
//!
//! The pipeline parses the stream and manages parameter sets itself; turning
//! length-prefixed samples into pictures is delegated to a backend. Platform
//! hardware decoders and the bundled software decoder implement the same two
//! traits.

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

use super::FormatDescription;
use crate::Result;
use crate::types::DecodedFrame;

/// Status reported while the decoder has not yet received a picture it can
/// reference, typically right after (re)connecting before the first keyframe.
pub const BAD_VIDEO_STATUS: i32 = -12909;

/// One coded picture ready for decoding or muxing.
#[derive(Debug, Clone)]
pub struct EncodedSample {
    /// Length-prefixed NAL units (4-byte big-endian lengths).
    pub data: Bytes,
    pub format: Arc<FormatDescription>,
    /// IDR picture
    pub is_sync: bool,
    /// Position of the source access unit in the stream
    pub sequence: u64,
}

/// Why a sample produced no picture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeFailure {
    /// The decoder needs more data before it can emit a picture.
    NoPictureYet,
    /// Decoder error status.
    Failed { status: i32, message: String },
}

impl DecodeFailure {
    pub fn failed(status: i32, message: impl Into<String>) -> Self {
        DecodeFailure::Failed { status, message: message.into() }
    }

    /// Expected while the stream is starting up; not worth logging.
    pub fn is_benign(&self) -> bool {
        match self {
            DecodeFailure::NoPictureYet => true,
            DecodeFailure::Failed { status, .. } => *status == BAD_VIDEO_STATUS,
        }
    }

    pub fn status(&self) -> i32 {
        match self {
            DecodeFailure::NoPictureYet => BAD_VIDEO_STATUS,
            DecodeFailure::Failed { status, .. } => *status,
        }
    }
}

impl fmt::Display for DecodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeFailure::NoPictureYet => f.write_str("no picture yet"),
            DecodeFailure::Failed { status, message } => write!(f, "status {}: {}", status, message),
        }
    }
}

/// Creates decompression sessions for a stream format.
pub trait DecoderBackend: Send + 'static {
    /// Name for logs
    fn name(&self) -> &'static str;

    fn create_session(&mut self, format: &FormatDescription) -> Result<Box<dyn DecompressionSession>>;
}

/// A stateful decoder bound to one format.
pub trait DecompressionSession: Send {
    /// Decode one sample. Failures affect this sample only; the session
    /// stays usable.
    fn decode(&mut self, sample: &EncodedSample) -> std::result::Result<DecodedFrame, DecodeFailure>;

    /// Release decoder resources. No further calls follow.
    fn invalidate(&mut self) {}
}
