//! Test utilities: bitstream fixtures and test doubles
//!
//! Builders here produce small but well-formed H.264 pieces (parameter sets
//! with emulation prevention, slices that never contain a start code) and a
//! mock decoder backend that records what it is asked to decode. They are
//! shared by unit tests, integration tests and the benchmarks.

#![cfg(any(test, feature = "benchmark"))]

use bytes::{BufMut, Bytes, BytesMut};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::{Duration, Instant};

use crate::transport::{DatagramTransport, MemoryTransport};
use crate::types::DecodedFrame;
use crate::video::{DecodeFailure, DecoderBackend, DecompressionSession, EncodedSample, FormatDescription};
use crate::{DroneError, Result};

/// MSB-first bit writer with Exp-Golomb support.
#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    current: u8,
    filled: u8,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_bit(&mut self, bit: bool) {
        self.current = (self.current << 1) | u8::from(bit);
        self.filled += 1;
        if self.filled == 8 {
            self.bytes.push(self.current);
            self.current = 0;
            self.filled = 0;
        }
    }

    pub fn write_bits(&mut self, value: u32, count: u32) {
        for shift in (0..count).rev() {
            self.write_bit((value >> shift) & 1 == 1);
        }
    }

    pub fn write_ue(&mut self, value: u32) {
        let code = u64::from(value) + 1;
        let bits = 64 - code.leading_zeros();
        for _ in 1..bits {
            self.write_bit(false);
        }
        for shift in (0..bits).rev() {
            self.write_bit((code >> shift) & 1 == 1);
        }
    }

    pub fn write_se(&mut self, value: i32) {
        let code = if value > 0 { (value as u32) * 2 - 1 } else { value.unsigned_abs() * 2 };
        self.write_ue(code);
    }

    /// Pad the last byte with zero bits and return the buffer.
    pub fn finish(mut self) -> Vec<u8> {
        if self.filled > 0 {
            self.bytes.push(self.current << (8 - self.filled));
        }
        self.bytes
    }
}

/// Insert emulation prevention bytes into an RBSP.
pub fn escape_rbsp(rbsp: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rbsp.len() + 4);
    let mut zeros = 0;
    for &byte in rbsp {
        if zeros >= 2 && byte <= 3 {
            out.push(0x03);
            zeros = 0;
        }
        zeros = if byte == 0 { zeros + 1 } else { 0 };
        out.push(byte);
    }
    out
}

fn nal(header: u8, rbsp: &[u8]) -> Vec<u8> {
    let mut out = vec![header];
    out.extend(escape_rbsp(rbsp));
    out
}

/// Baseline SPS (profile 66, constraints 0xC0, level 3.1, id 0) for a
/// `width` x `height` picture, cropped when the size is not macroblock
/// aligned. Header byte included.
pub fn sps_nal(width: u32, height: u32) -> Vec<u8> {
    let width_mbs = width.div_ceil(16);
    let height_mbs = height.div_ceil(16);

    let mut w = BitWriter::new();
    w.write_bits(66, 8);
    w.write_bits(0xC0, 8);
    w.write_bits(31, 8);
    w.write_ue(0); // seq_parameter_set_id
    w.write_ue(0); // log2_max_frame_num_minus4
    w.write_ue(2); // pic_order_cnt_type
    w.write_ue(1); // max_num_ref_frames
    w.write_bit(false);
    w.write_ue(width_mbs - 1);
    w.write_ue(height_mbs - 1);
    w.write_bit(true); // frame_mbs_only
    w.write_bit(true); // direct_8x8_inference

    let crop_right = (width_mbs * 16 - width) / 2;
    let crop_bottom = (height_mbs * 16 - height) / 2;
    if crop_right > 0 || crop_bottom > 0 {
        w.write_bit(true);
        w.write_ue(0);
        w.write_ue(crop_right);
        w.write_ue(0);
        w.write_ue(crop_bottom);
    } else {
        w.write_bit(false);
    }

    finish_sps(w)
}

/// Close an SPS body written up to the cropping fields: no VUI, stop bit,
/// emulation prevention and header byte.
pub fn finish_sps(mut w: BitWriter) -> Vec<u8> {
    w.write_bit(false); // vui_parameters_present
    w.write_bit(true); // rbsp stop bit
    nal(0x67, &w.finish())
}

/// PPS with id 0 referencing SPS 0.
pub fn pps_nal() -> Vec<u8> {
    pps_nal_with_ids(0, 0)
}

pub fn pps_nal_with_ids(pps_id: u32, sps_id: u32) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_ue(pps_id);
    w.write_ue(sps_id);
    w.write_bit(false); // entropy_coding_mode
    w.write_bit(false); // bottom_field_pic_order_in_frame_present
    w.write_ue(0); // num_slice_groups_minus1
    w.write_ue(0);
    w.write_ue(0);
    w.write_bit(false);
    w.write_bits(0, 2);
    w.write_se(0);
    w.write_se(0);
    w.write_se(0);
    w.write_bit(true); // deblocking_filter_control_present
    w.write_bit(false);
    w.write_bit(false);
    w.write_bit(true);
    nal(0x68, &w.finish())
}

fn slice_body(len: usize) -> impl Iterator<Item = u8> {
    // Never zero, so the body cannot contain a start code
    (0..len).map(|i| (i % 251) as u8 + 1)
}

/// IDR slice NAL: header plus `len` payload bytes.
pub fn idr_slice(len: usize) -> Vec<u8> {
    std::iter::once(0x65).chain(slice_body(len)).collect()
}

/// Non-IDR slice NAL: header plus `len` payload bytes.
pub fn slice_nal(len: usize) -> Vec<u8> {
    std::iter::once(0x41).chain(slice_body(len)).collect()
}

/// Join NAL units into an Annex-B buffer with 4-byte start codes.
pub fn annexb<T: AsRef<[u8]>>(nals: &[T]) -> Vec<u8> {
    let mut out = Vec::new();
    for nal in nals {
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(nal.as_ref());
    }
    out
}

/// Split a buffer the way the drone does: full `size` datagrams, then the rest.
pub fn fragment(data: &[u8], size: usize) -> Vec<Vec<u8>> {
    data.chunks(size).map(<[u8]>::to_vec).collect()
}

/// Length-prefix a single NAL unit as a sample payload.
pub fn annexb_to_sample(nal: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(nal.len() + 4);
    out.put_u32(nal.len() as u32);
    out.put_slice(nal);
    out.freeze()
}

/// A keyframe access unit followed by `count - 1` predicted ones.
pub fn access_units(width: u32, height: u32, count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|n| {
            if n == 0 {
                annexb(&[sps_nal(width, height), pps_nal(), idr_slice(4000)])
            } else {
                annexb(&[slice_nal(900)])
            }
        })
        .collect()
}

/// Failure to inject into the next [`MockBackend`] decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeFailureKind {
    NoPictureYet,
    Status(i32),
}

#[derive(Debug, Default)]
struct MockState {
    sessions_created: usize,
    invalidated: usize,
    submitted: Vec<EncodedSample>,
    fail_next: Option<DecodeFailureKind>,
    refuse_sessions: bool,
}

/// Decoder backend double.
///
/// Clones share state, so a test can keep one handle while the decoder owns
/// another. Every sample decodes to a black frame of the format's size.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn sessions_created(&self) -> usize {
        self.state().sessions_created
    }

    pub fn invalidated(&self) -> usize {
        self.state().invalidated
    }

    pub fn submitted(&self) -> Vec<EncodedSample> {
        self.state().submitted.clone()
    }

    pub fn fail_next(&self, kind: DecodeFailureKind) {
        self.state().fail_next = Some(kind);
    }

    pub fn refuse_sessions(&self, refuse: bool) {
        self.state().refuse_sessions = refuse;
    }
}

impl DecoderBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn create_session(&mut self, format: &FormatDescription) -> Result<Box<dyn DecompressionSession>> {
        let mut state = self.state();
        if state.refuse_sessions {
            return Err(DroneError::Decoder { status: -12911, message: "session refused".into() });
        }
        state.sessions_created += 1;
        Ok(Box::new(MockSession {
            backend: self.clone(),
            width: format.width(),
            height: format.height(),
        }))
    }
}

struct MockSession {
    backend: MockBackend,
    width: u32,
    height: u32,
}

impl DecompressionSession for MockSession {
    fn decode(&mut self, sample: &EncodedSample) -> std::result::Result<DecodedFrame, DecodeFailure> {
        let mut state = self.backend.state();
        match state.fail_next.take() {
            Some(DecodeFailureKind::NoPictureYet) => return Err(DecodeFailure::NoPictureYet),
            Some(DecodeFailureKind::Status(status)) => {
                return Err(DecodeFailure::failed(status, "injected failure"));
            }
            None => {}
        }
        state.submitted.push(sample.clone());

        let pixels = vec![0; DecodedFrame::expected_len(self.width, self.height)];
        Ok(DecodedFrame::new(self.width, self.height, pixels, sample.sequence))
    }

    fn invalidate(&mut self) {
        self.backend.state().invalidated += 1;
    }
}

/// Drone-side end of an in-memory link that timestamps what it receives.
///
/// Under a paused tokio clock the timestamps are virtual, which makes send
/// cadence assertions exact.
pub struct RecordingTransport {
    inner: Arc<MemoryTransport>,
    start: Instant,
}

impl RecordingTransport {
    /// Returns the application end and the recording drone end.
    pub fn pair() -> (Arc<dyn DatagramTransport>, Self) {
        let (app, drone) = MemoryTransport::pair();
        (Arc::new(app), Self { inner: Arc::new(drone), start: Instant::now() })
    }

    /// Next datagram as text, with the time since the pair was created.
    pub async fn next(&self) -> Result<(Duration, String)> {
        let datagram = self.inner.recv().await?;
        Ok((self.start.elapsed(), String::from_utf8_lossy(&datagram).into_owned()))
    }

    /// Reply to the application end.
    pub async fn reply(&self, payload: &[u8]) -> Result<()> {
        self.inner.send(payload).await
    }
}
