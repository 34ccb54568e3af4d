//! Parameter set header parsing
//!
//! Only the fields needed to describe the stream are decoded: profile,
//! level, ids and the cropped picture size. Everything after the frame
//! cropping rectangle (VUI and friends) is ignored.

use crate::{DroneError, Result};

/// Remove emulation prevention bytes (`00 00 03` -> `00 00`).
pub fn to_rbsp(nal: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nal.len());
    let mut zeros = 0;
    for &byte in nal {
        if zeros >= 2 && byte == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if byte == 0 { zeros + 1 } else { 0 };
        out.push(byte);
    }
    out
}

/// MSB-first bit reader with Exp-Golomb support.
pub struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn bits_left(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.position)
    }

    pub fn read_bit(&mut self) -> Result<bool> {
        let byte = self
            .data
            .get(self.position / 8)
            .ok_or_else(|| DroneError::malformed_nal("parameter set truncated"))?;
        let bit = (byte >> (7 - self.position % 8)) & 1;
        self.position += 1;
        Ok(bit == 1)
    }

    pub fn read_bits(&mut self, count: u32) -> Result<u32> {
        debug_assert!(count <= 32);
        let mut value = 0u32;
        for _ in 0..count {
            value = (value << 1) | u32::from(self.read_bit()?);
        }
        Ok(value)
    }

    pub fn skip_bits(&mut self, count: usize) -> Result<()> {
        if count > self.bits_left() {
            return Err(DroneError::malformed_nal("parameter set truncated"));
        }
        self.position += count;
        Ok(())
    }

    /// Unsigned Exp-Golomb code.
    pub fn read_ue(&mut self) -> Result<u32> {
        let mut leading_zeros = 0;
        while !self.read_bit()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(DroneError::malformed_nal("Exp-Golomb code too long"));
            }
        }
        let suffix = u64::from(self.read_bits(leading_zeros)?);
        let value = (1u64 << leading_zeros) - 1 + suffix;
        u32::try_from(value).map_err(|_| DroneError::malformed_nal("Exp-Golomb value overflow"))
    }

    /// Signed Exp-Golomb code.
    pub fn read_se(&mut self) -> Result<i32> {
        let code = i64::from(self.read_ue()?);
        let value = if code % 2 == 1 { (code + 1) / 2 } else { -(code / 2) };
        Ok(value as i32)
    }
}

/// Decoded sequence parameter set header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceParameterSet {
    pub profile_idc: u8,
    pub constraint_flags: u8,
    pub level_idc: u8,
    pub id: u32,
    pub chroma_format_idc: u32,
    pub frame_mbs_only: bool,
    /// Display width after cropping
    pub width: u32,
    /// Display height after cropping
    pub height: u32,
}

// Largest picture dimension accepted, in macroblocks
const MAX_MBS: u32 = 1024;

// Profiles carrying the chroma format and scaling matrix fields
const HIGH_PROFILES: [u8; 13] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134, 135];

impl SequenceParameterSet {
    /// Parse an SPS NAL unit, header byte included.
    pub fn parse(nal: &[u8]) -> Result<Self> {
        let (&header, body) =
            nal.split_first().ok_or_else(|| DroneError::malformed_nal("empty SPS"))?;
        if header & 0x1F != 7 {
            return Err(DroneError::malformed_nal(format!(
                "expected SPS, found NAL type {}",
                header & 0x1F
            )));
        }

        let rbsp = to_rbsp(body);
        let mut r = BitReader::new(&rbsp);

        let profile_idc = r.read_bits(8)? as u8;
        let constraint_flags = r.read_bits(8)? as u8;
        let level_idc = r.read_bits(8)? as u8;
        let id = r.read_ue()?;
        if id > 31 {
            return Err(DroneError::malformed_nal(format!("SPS id {} out of range", id)));
        }

        let mut chroma_format_idc = 1;
        let mut separate_colour_plane = false;
        if HIGH_PROFILES.contains(&profile_idc) {
            chroma_format_idc = r.read_ue()?;
            if chroma_format_idc > 3 {
                return Err(DroneError::malformed_nal("chroma_format_idc out of range"));
            }
            if chroma_format_idc == 3 {
                separate_colour_plane = r.read_bit()?;
            }
            let _bit_depth_luma = r.read_ue()?;
            let _bit_depth_chroma = r.read_ue()?;
            let _transform_bypass = r.read_bit()?;
            if r.read_bit()? {
                let lists = if chroma_format_idc == 3 { 12 } else { 8 };
                for i in 0..lists {
                    if r.read_bit()? {
                        skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 })?;
                    }
                }
            }
        }

        let _log2_max_frame_num = r.read_ue()?;
        match r.read_ue()? {
            0 => {
                let _log2_max_poc_lsb = r.read_ue()?;
            }
            1 => {
                let _delta_always_zero = r.read_bit()?;
                let _offset_for_non_ref_pic = r.read_se()?;
                let _offset_for_top_to_bottom = r.read_se()?;
                let cycle = r.read_ue()?;
                if cycle > 255 {
                    return Err(DroneError::malformed_nal("POC cycle too long"));
                }
                for _ in 0..cycle {
                    r.read_se()?;
                }
            }
            _ => {}
        }

        let _max_num_ref_frames = r.read_ue()?;
        let _gaps_allowed = r.read_bit()?;
        let width_mbs = r.read_ue()?.saturating_add(1);
        let height_map_units = r.read_ue()?.saturating_add(1);
        if width_mbs > MAX_MBS || height_map_units > MAX_MBS {
            return Err(DroneError::malformed_nal(format!(
                "picture of {}x{} macroblocks out of range",
                width_mbs, height_map_units
            )));
        }
        let frame_mbs_only = r.read_bit()?;
        if !frame_mbs_only {
            let _mb_adaptive = r.read_bit()?;
        }
        let _direct_8x8 = r.read_bit()?;

        let (mut crop_left, mut crop_right, mut crop_top, mut crop_bottom) = (0, 0, 0, 0);
        if r.read_bit()? {
            crop_left = r.read_ue()?;
            crop_right = r.read_ue()?;
            crop_top = r.read_ue()?;
            crop_bottom = r.read_ue()?;
        }

        let field_factor = if frame_mbs_only { 1 } else { 2 };
        let chroma_array_type = if separate_colour_plane { 0 } else { chroma_format_idc };
        let (crop_x, crop_y) = match chroma_array_type {
            0 => (1, field_factor),
            1 => (2, 2 * field_factor),
            2 => (2, field_factor),
            _ => (1, field_factor),
        };

        let coded_width = width_mbs * 16;
        let coded_height = height_map_units * 16 * field_factor;
        let crop_width = crop_left
            .checked_add(crop_right)
            .and_then(|c| c.checked_mul(crop_x))
            .ok_or_else(|| DroneError::malformed_nal("cropping exceeds picture width"))?;
        let crop_height = crop_top
            .checked_add(crop_bottom)
            .and_then(|c| c.checked_mul(crop_y))
            .ok_or_else(|| DroneError::malformed_nal("cropping exceeds picture height"))?;
        let width = coded_width
            .checked_sub(crop_width)
            .filter(|w| *w > 0)
            .ok_or_else(|| DroneError::malformed_nal("cropping exceeds picture width"))?;
        let height = coded_height
            .checked_sub(crop_height)
            .filter(|h| *h > 0)
            .ok_or_else(|| DroneError::malformed_nal("cropping exceeds picture height"))?;

        Ok(Self {
            profile_idc,
            constraint_flags,
            level_idc,
            id,
            chroma_format_idc,
            frame_mbs_only,
            width,
            height,
        })
    }
}

fn skip_scaling_list(r: &mut BitReader<'_>, size: usize) -> Result<()> {
    let mut last = 8i32;
    let mut next = 8i32;
    for _ in 0..size {
        if next != 0 {
            let delta = r.read_se()?;
            if !(-128..=127).contains(&delta) {
                return Err(DroneError::malformed_nal(format!(
                    "scaling list delta {} out of range",
                    delta
                )));
            }
            next = (last + delta + 256).rem_euclid(256);
        }
        if next != 0 {
            last = next;
        }
    }
    Ok(())
}

/// Decoded picture parameter set header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureParameterSet {
    pub id: u32,
    pub sps_id: u32,
}

impl PictureParameterSet {
    /// Parse a PPS NAL unit, header byte included.
    pub fn parse(nal: &[u8]) -> Result<Self> {
        let (&header, body) =
            nal.split_first().ok_or_else(|| DroneError::malformed_nal("empty PPS"))?;
        if header & 0x1F != 8 {
            return Err(DroneError::malformed_nal(format!(
                "expected PPS, found NAL type {}",
                header & 0x1F
            )));
        }

        let rbsp = to_rbsp(body);
        let mut r = BitReader::new(&rbsp);
        let id = r.read_ue()?;
        let sps_id = r.read_ue()?;
        if id > 255 || sps_id > 31 {
            return Err(DroneError::malformed_nal("PPS ids out of range"));
        }
        Ok(Self { id, sps_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{BitWriter, finish_sps, pps_nal, pps_nal_with_ids, sps_nal};

    #[test]
    fn emulation_prevention_is_removed() {
        assert_eq!(to_rbsp(&[0, 0, 3, 1]), vec![0, 0, 1]);
        assert_eq!(to_rbsp(&[0, 0, 3, 0, 0, 3]), vec![0, 0, 0, 0]);
        assert_eq!(to_rbsp(&[1, 0, 3]), vec![1, 0, 3]);
    }

    #[test]
    fn exp_golomb_round_trip() {
        let mut w = BitWriter::new();
        for v in [0, 1, 2, 7, 254, 65535] {
            w.write_ue(v);
        }
        for v in [0, 1, -1, 5, -300] {
            w.write_se(v);
        }
        let data = w.finish();

        let mut r = BitReader::new(&data);
        for v in [0, 1, 2, 7, 254, 65535] {
            assert_eq!(r.read_ue().unwrap(), v);
        }
        for v in [0, 1, -1, 5, -300] {
            assert_eq!(r.read_se().unwrap(), v);
        }
    }

    #[test]
    fn truncated_input_fails() {
        let mut r = BitReader::new(&[0x00]);
        assert!(matches!(r.read_ue(), Err(DroneError::MalformedNal { .. })));
    }

    #[test]
    fn baseline_sps_dimensions() {
        let sps = SequenceParameterSet::parse(&sps_nal(960, 720)).unwrap();
        assert_eq!(sps.profile_idc, 66);
        assert_eq!(sps.id, 0);
        assert_eq!((sps.width, sps.height), (960, 720));
        assert!(sps.frame_mbs_only);
    }

    #[test]
    fn cropping_is_applied() {
        // 1080 lines are coded as 68 macroblock rows, cropped by 8
        let sps = SequenceParameterSet::parse(&sps_nal(1920, 1080)).unwrap();
        assert_eq!((sps.width, sps.height), (1920, 1080));
    }

    #[test]
    fn pps_references_sps() {
        let pps = PictureParameterSet::parse(&pps_nal()).unwrap();
        assert_eq!(pps, PictureParameterSet { id: 0, sps_id: 0 });

        let pps = PictureParameterSet::parse(&pps_nal_with_ids(3, 1)).unwrap();
        assert_eq!(pps, PictureParameterSet { id: 3, sps_id: 1 });
    }

    /// Baseline SPS header with the given macroblock counts and crop.
    fn raw_sps(width_mbs_minus1: u32, height_mbs_minus1: u32, crop: Option<[u32; 4]>) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_bits(66, 8);
        w.write_bits(0xC0, 8);
        w.write_bits(31, 8);
        w.write_ue(0);
        w.write_ue(0);
        w.write_ue(2);
        w.write_ue(1);
        w.write_bit(false);
        w.write_ue(width_mbs_minus1);
        w.write_ue(height_mbs_minus1);
        w.write_bit(true);
        w.write_bit(true);
        match crop {
            Some(offsets) => {
                w.write_bit(true);
                for offset in offsets {
                    w.write_ue(offset);
                }
            }
            None => w.write_bit(false),
        }
        finish_sps(w)
    }

    #[test]
    fn oversized_picture_is_rejected() {
        let result = SequenceParameterSet::parse(&raw_sps(0x1000_0000, 44, None));
        assert!(matches!(result, Err(DroneError::MalformedNal { .. })));

        let result = SequenceParameterSet::parse(&raw_sps(u32::MAX - 1, u32::MAX - 1, None));
        assert!(matches!(result, Err(DroneError::MalformedNal { .. })));

        let sps = SequenceParameterSet::parse(&raw_sps(59, 44, None)).unwrap();
        assert_eq!((sps.width, sps.height), (960, 720));
    }

    #[test]
    fn overflowing_crop_is_rejected() {
        let crop = [u32::MAX - 1, u32::MAX - 1, 0, 0];
        let result = SequenceParameterSet::parse(&raw_sps(59, 44, Some(crop)));
        assert!(matches!(result, Err(DroneError::MalformedNal { .. })));

        let crop = [0, 0, 0x8000_0000, 0x8000_0000];
        let result = SequenceParameterSet::parse(&raw_sps(59, 44, Some(crop)));
        assert!(matches!(result, Err(DroneError::MalformedNal { .. })));
    }

    #[test]
    fn scaling_list_delta_out_of_range() {
        let mut w = BitWriter::new();
        w.write_bits(100, 8);
        w.write_bits(0, 8);
        w.write_bits(40, 8);
        w.write_ue(0);
        w.write_ue(1);
        w.write_ue(0);
        w.write_ue(0);
        w.write_bit(false);
        // Scaling matrix present, first list present with a huge delta
        w.write_bit(true);
        w.write_bit(true);
        w.write_se(i32::MAX);
        for _ in 0..64 {
            w.write_bit(true);
        }
        let result = SequenceParameterSet::parse(&finish_sps(w));
        assert!(matches!(result, Err(DroneError::MalformedNal { .. })));
    }

    #[test]
    fn wrong_nal_type_is_rejected() {
        assert!(SequenceParameterSet::parse(&pps_nal()).is_err());
        assert!(PictureParameterSet::parse(&sps_nal(640, 480)).is_err());
        assert!(SequenceParameterSet::parse(&[]).is_err());
    }
}
