//! Annex-B access unit parsing
//!
//! Each reassembled access unit starts with a 4-byte start code. When it
//! carries parameter sets they come first, in the order SPS, PPS, picture:
//!
//! ```text
//! 00 00 00 01 | SPS ... | 00 00 00 01 | PPS ... | 00 00 00 01 | slice ...
//! ```
//!
//! Parameter sets are short, so their terminating start codes are searched
//! for in bounded windows. The picture data is converted in place to the
//! 4-byte length-prefixed form decoders and muxers expect.

use bytes::Bytes;
use std::ops::Range;

use crate::{DroneError, Result};

/// Four-byte Annex-B start code.
pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// The start code ending an SPS must begin before this offset.
pub const SPS_SEARCH_LIMIT: usize = 40;

/// The start code ending a PPS must begin within this many bytes of the PPS
/// header.
pub const PPS_SEARCH_SPAN: usize = 30;

/// Length of the big-endian length prefix replacing each start code.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// NAL unit type, from the low five bits of the header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitType {
    Slice,
    IdrSlice,
    Sei,
    Sps,
    Pps,
    AccessUnitDelimiter,
    Other(u8),
}

impl NalUnitType {
    pub fn from_header(header: u8) -> Self {
        match header & 0x1F {
            1 => NalUnitType::Slice,
            5 => NalUnitType::IdrSlice,
            6 => NalUnitType::Sei,
            7 => NalUnitType::Sps,
            8 => NalUnitType::Pps,
            9 => NalUnitType::AccessUnitDelimiter,
            other => NalUnitType::Other(other),
        }
    }

    /// Coded picture data, IDR or not.
    pub fn is_slice(self) -> bool {
        matches!(self, NalUnitType::Slice | NalUnitType::IdrSlice)
    }

    pub fn code(self) -> u8 {
        match self {
            NalUnitType::Slice => 1,
            NalUnitType::IdrSlice => 5,
            NalUnitType::Sei => 6,
            NalUnitType::Sps => 7,
            NalUnitType::Pps => 8,
            NalUnitType::AccessUnitDelimiter => 9,
            NalUnitType::Other(code) => code,
        }
    }
}

/// Find a 4-byte start code beginning at an offset in `from..to`.
pub fn find_start_code(buf: &[u8], from: usize, to: usize) -> Option<usize> {
    let last = buf.len().checked_sub(START_CODE.len())?;
    (from..to.min(last + 1)).find(|&i| buf[i..i + START_CODE.len()] == START_CODE)
}

/// Rewrite every 4-byte start code in `data` into a big-endian length prefix.
///
/// `data` must begin with a start code. Returns the number of NAL units
/// converted.
pub fn length_prefix_in_place(data: &mut [u8]) -> Result<usize> {
    if data.len() <= START_CODE.len() || data[..START_CODE.len()] != START_CODE {
        return Err(DroneError::malformed_nal("sample does not begin with a start code"));
    }

    let mut starts = vec![0];
    let mut from = START_CODE.len();
    while let Some(i) = find_start_code(data, from, data.len()) {
        starts.push(i);
        from = i + START_CODE.len();
    }

    for (n, &start) in starts.iter().enumerate() {
        let end = starts.get(n + 1).copied().unwrap_or(data.len());
        write_length(data, start, end)?;
    }
    Ok(starts.len())
}

fn write_length(data: &mut [u8], start: usize, end: usize) -> Result<()> {
    let len = u32::try_from(end - start - LENGTH_PREFIX_SIZE)
        .map_err(|_| DroneError::malformed_nal("NAL unit longer than 4 GiB"))?;
    data[start..start + LENGTH_PREFIX_SIZE].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

/// Coded picture located in an access unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureLocation {
    /// Offset of the picture's length prefix.
    pub offset: usize,
    pub nal_type: NalUnitType,
}

/// A parsed access unit.
///
/// Holds the converted buffer together with where its parameter sets and
/// picture data live.
#[derive(Debug, Clone)]
pub struct AccessUnit {
    data: Bytes,
    first_type: NalUnitType,
    sps: Option<Range<usize>>,
    pps: Option<Range<usize>>,
    picture: Option<PictureLocation>,
}

impl AccessUnit {
    /// Parse one reassembled access unit.
    ///
    /// Returns `Ok(None)` when no parameter sets are known yet
    /// (`have_parameters == false`) and the unit does not start with an SPS:
    /// nothing in it can be decoded. A parameter-set scan that runs past its
    /// window, or parameter sets out of order, abort the unit with
    /// [`DroneError::MalformedNal`].
    pub fn parse(mut buf: Vec<u8>, have_parameters: bool) -> Result<Option<Self>> {
        if buf.len() <= START_CODE.len() || buf[..START_CODE.len()] != START_CODE {
            return Err(DroneError::malformed_nal("access unit does not begin with a start code"));
        }

        let first_type = NalUnitType::from_header(buf[START_CODE.len()]);
        if !have_parameters && first_type != NalUnitType::Sps {
            return Ok(None);
        }

        let mut nal_type = first_type;
        let mut sps = None;
        let mut pps = None;
        let mut picture_offset = 0;

        if nal_type == NalUnitType::Sps {
            let pps_start = find_start_code(&buf, START_CODE.len(), SPS_SEARCH_LIMIT).ok_or_else(|| {
                DroneError::malformed_nal(format!(
                    "no start code after SPS within {} bytes",
                    SPS_SEARCH_LIMIT
                ))
            })?;
            sps = Some(START_CODE.len()..pps_start);
            nal_type = header_type_at(&buf, pps_start)?;
            if nal_type != NalUnitType::Pps {
                return Err(DroneError::malformed_nal(format!(
                    "SPS followed by {:?} instead of PPS",
                    nal_type
                )));
            }
            picture_offset = pps_start;
        }

        if nal_type == NalUnitType::Pps {
            if sps.is_none() {
                return Err(DroneError::malformed_nal("PPS without a preceding SPS"));
            }

            let pps_start = picture_offset;
            let body = pps_start + START_CODE.len();
            let window_end = body + PPS_SEARCH_SPAN;

            match find_start_code(&buf, body, window_end) {
                Some(picture_start) => {
                    pps = Some(body..picture_start);
                    picture_offset = picture_start;
                    nal_type = header_type_at(&buf, picture_start)?;
                }
                None if buf.len() < window_end + START_CODE.len() => {
                    // Parameter sets with no picture behind them
                    pps = Some(body..buf.len());
                    picture_offset = buf.len();
                }
                None => {
                    return Err(DroneError::malformed_nal(format!(
                        "no start code after PPS within {} bytes",
                        PPS_SEARCH_SPAN
                    )));
                }
            }
        }

        let picture = if picture_offset < buf.len() && nal_type.is_slice() {
            length_prefix_in_place(&mut buf[picture_offset..])?;
            Some(PictureLocation { offset: picture_offset, nal_type })
        } else {
            None
        };

        // Leading start code carries the remaining payload length
        if picture.is_none() || picture_offset > 0 {
            let len = buf.len();
            write_length(&mut buf, 0, len)?;
        }
        if let Some(pps) = &pps {
            write_length(&mut buf, pps.start - LENGTH_PREFIX_SIZE, pps.end)?;
        }

        Ok(Some(Self { data: Bytes::from(buf), first_type, sps, pps, picture }))
    }

    /// Type of the first NAL unit in the buffer.
    pub fn first_type(&self) -> NalUnitType {
        self.first_type
    }

    /// SPS payload including its header byte.
    pub fn sps(&self) -> Option<Bytes> {
        self.sps.clone().map(|r| self.data.slice(r))
    }

    /// PPS payload including its header byte.
    pub fn pps(&self) -> Option<Bytes> {
        self.pps.clone().map(|r| self.data.slice(r))
    }

    pub fn parameter_sets(&self) -> Option<(Bytes, Bytes)> {
        Some((self.sps()?, self.pps()?))
    }

    pub fn picture_type(&self) -> Option<NalUnitType> {
        self.picture.map(|p| p.nal_type)
    }

    pub fn picture_location(&self) -> Option<PictureLocation> {
        self.picture
    }

    /// Picture data from its first length prefix through the end of the unit.
    pub fn picture(&self) -> Option<Bytes> {
        self.picture.map(|p| self.data.slice(p.offset..))
    }

    pub fn is_keyframe(&self) -> bool {
        self.picture_type() == Some(NalUnitType::IdrSlice)
    }

    /// The whole converted buffer.
    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }
}

fn header_type_at(buf: &[u8], start_code: usize) -> Result<NalUnitType> {
    buf.get(start_code + START_CODE.len())
        .map(|header| NalUnitType::from_header(*header))
        .ok_or_else(|| DroneError::malformed_nal("start code at end of access unit"))
}
