//! Software decoder backend built on OpenH264

use openh264::decoder::Decoder;
use openh264::formats::YUVSource;
use tracing::debug;

use super::backend::{DecodeFailure, DecoderBackend, DecompressionSession, EncodedSample};
use super::format::FormatDescription;
use super::nal::START_CODE;
use crate::types::DecodedFrame;
use crate::{DroneError, Result};

/// Status used for errors raised by OpenH264 itself.
const OPENH264_ERROR_STATUS: i32 = -1;

/// Decodes on the CPU through the bundled OpenH264 library.
#[derive(Debug, Default)]
pub struct OpenH264Backend;

impl OpenH264Backend {
    pub fn new() -> Self {
        Self
    }
}

impl DecoderBackend for OpenH264Backend {
    fn name(&self) -> &'static str {
        "openh264"
    }

    fn create_session(&mut self, format: &FormatDescription) -> Result<Box<dyn DecompressionSession>> {
        let mut decoder = Decoder::new().map_err(|e| DroneError::Decoder {
            status: OPENH264_ERROR_STATUS,
            message: format!("failed to create decoder: {:?}", e),
        })?;

        // Prime the decoder with the parameter sets in Annex-B form
        let mut parameters = Vec::with_capacity(format.sps().len() + format.pps().len() + 8);
        for set in [format.sps(), format.pps()] {
            parameters.extend_from_slice(&START_CODE);
            parameters.extend_from_slice(set);
        }
        decoder.decode(&parameters).map_err(|e| DroneError::Decoder {
            status: OPENH264_ERROR_STATUS,
            message: format!("parameter sets rejected: {:?}", e),
        })?;

        debug!(width = format.width(), height = format.height(), "OpenH264 session created");
        Ok(Box::new(OpenH264Session { decoder: Some(decoder), annexb: Vec::new() }))
    }
}

struct OpenH264Session {
    decoder: Option<Decoder>,
    annexb: Vec<u8>,
}

impl DecompressionSession for OpenH264Session {
    fn decode(&mut self, sample: &EncodedSample) -> std::result::Result<DecodedFrame, DecodeFailure> {
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| DecodeFailure::failed(OPENH264_ERROR_STATUS, "session invalidated"))?;

        to_annexb(&sample.data, &mut self.annexb)
            .map_err(|e| DecodeFailure::failed(OPENH264_ERROR_STATUS, e.to_string()))?;

        let yuv = decoder
            .decode(&self.annexb)
            .map_err(|e| DecodeFailure::failed(OPENH264_ERROR_STATUS, format!("{:?}", e)))?
            .ok_or(DecodeFailure::NoPictureYet)?;

        let (width, height) = yuv.dimensions();
        let mut pixels = vec![0u8; width * height * 4];
        yuv.write_rgba8(&mut pixels);
        Ok(DecodedFrame::new(width as u32, height as u32, pixels, sample.sequence))
    }

    fn invalidate(&mut self) {
        self.decoder = None;
    }
}

/// Convert length-prefixed NAL units back to start-code form.
fn to_annexb(sample: &[u8], out: &mut Vec<u8>) -> Result<()> {
    out.clear();
    let mut rest = sample;
    while !rest.is_empty() {
        let (prefix, body) = rest
            .split_first_chunk::<4>()
            .ok_or_else(|| DroneError::malformed_nal("truncated length prefix"))?;
        let len = u32::from_be_bytes(*prefix) as usize;
        if len > body.len() {
            return Err(DroneError::malformed_nal("NAL length exceeds sample"));
        }
        out.extend_from_slice(&START_CODE);
        out.extend_from_slice(&body[..len]);
        rest = &body[len..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_prefixes_become_start_codes() {
        let sample = [0, 0, 0, 2, 0x65, 0xAA, 0, 0, 0, 1, 0x41];
        let mut out = Vec::new();
        to_annexb(&sample, &mut out).unwrap();
        assert_eq!(out, vec![0, 0, 0, 1, 0x65, 0xAA, 0, 0, 0, 1, 0x41]);
    }

    #[test]
    fn overlong_length_is_rejected() {
        let mut out = Vec::new();
        assert!(to_annexb(&[0, 0, 0, 9, 0x65], &mut out).is_err());
        assert!(to_annexb(&[0, 0], &mut out).is_err());
    }
}
