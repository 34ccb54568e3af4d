//! Decoded picture type

use std::sync::Arc;

/// A decoded, displayable picture.
///
/// Pixels are tightly packed RGBA8 rows. The buffer is shared, so cloning a
/// frame or handing it to several subscribers never copies pixel data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// RGBA8 pixel data, `width * height * 4` bytes
    pub pixels: Arc<[u8]>,
    /// Position of the source access unit in the stream
    pub sequence: u64,
}

impl DecodedFrame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>, sequence: u64) -> Self {
        Self { width, height, pixels: pixels.into(), sequence }
    }

    /// Expected RGBA8 buffer length for these dimensions
    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 4
    }
}
