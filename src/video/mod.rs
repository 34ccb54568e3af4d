//! H.264 video pipeline
//!
//! ```text
//! datagrams -> FrameAssembler -> AccessUnit::parse -> VideoDecoder -> DecodedFrame
//!                                                          |
//!                                                          +-> Recorder (encoded samples)
//! ```
//!
//! The stream is raw Annex-B with no framing. [`FrameAssembler`] recovers
//! access units from datagram sizes, [`nal`] locates parameter sets and
//! picture data inside them, and [`VideoDecoder`] keeps the decompression
//! session in step with the stream's parameter sets. Turning samples into
//! pixels is the job of a [`DecoderBackend`].

pub mod backend;
pub mod decoder;
pub mod format;
pub mod ingest;
pub mod nal;
#[cfg(feature = "openh264")]
pub mod openh264;
pub mod reassembly;
pub mod sps;

pub use backend::{BAD_VIDEO_STATUS, DecodeFailure, DecoderBackend, DecompressionSession, EncodedSample};
pub use decoder::{DecoderStats, UnitOutcome, VideoDecoder};
pub use format::FormatDescription;
pub use ingest::VideoPipeline;
pub use nal::{AccessUnit, NalUnitType};
#[cfg(feature = "openh264")]
pub use openh264::OpenH264Backend;
pub use reassembly::FrameAssembler;
