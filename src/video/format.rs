//! Codec configuration derived from a parameter set pair

use bytes::Bytes;

use super::sps::{PictureParameterSet, SequenceParameterSet};
use crate::{DroneError, Result};

/// Stream format built from one SPS and one PPS.
///
/// Two descriptions are equal when both parameter sets are byte-identical,
/// which is what decides whether a decompression session can be kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescription {
    sps: Bytes,
    pps: Bytes,
    sequence: SequenceParameterSet,
    picture: PictureParameterSet,
}

impl FormatDescription {
    /// Length prefix size of every sample described by this format.
    pub const NAL_LENGTH_SIZE: usize = 4;

    /// Validate and describe a parameter set pair, header bytes included.
    pub fn from_parameter_sets(sps: Bytes, pps: Bytes) -> Result<Self> {
        let sequence = SequenceParameterSet::parse(&sps)
            .map_err(|e| DroneError::format_description(format!("SPS rejected: {}", e)))?;
        let picture = PictureParameterSet::parse(&pps)
            .map_err(|e| DroneError::format_description(format!("PPS rejected: {}", e)))?;

        if picture.sps_id != sequence.id {
            return Err(DroneError::format_description(format!(
                "PPS {} references SPS {}, stream carries SPS {}",
                picture.id, picture.sps_id, sequence.id
            )));
        }

        Ok(Self { sps, pps, sequence, picture })
    }

    pub fn sps(&self) -> &Bytes {
        &self.sps
    }

    pub fn pps(&self) -> &Bytes {
        &self.pps
    }

    pub fn width(&self) -> u32 {
        self.sequence.width
    }

    pub fn height(&self) -> u32 {
        self.sequence.height
    }

    pub fn profile_idc(&self) -> u8 {
        self.sequence.profile_idc
    }

    pub fn constraint_flags(&self) -> u8 {
        self.sequence.constraint_flags
    }

    pub fn level_idc(&self) -> u8 {
        self.sequence.level_idc
    }

    pub fn sequence(&self) -> &SequenceParameterSet {
        &self.sequence
    }

    pub fn picture(&self) -> &PictureParameterSet {
        &self.picture
    }

    /// `avc1.PPCCLL` codec string.
    pub fn codec_string(&self) -> String {
        format!(
            "avc1.{:02x}{:02x}{:02x}",
            self.sequence.profile_idc, self.sequence.constraint_flags, self.sequence.level_idc
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{pps_nal, pps_nal_with_ids, sps_nal};

    #[test]
    fn describes_valid_pair() {
        let format =
            FormatDescription::from_parameter_sets(sps_nal(960, 720).into(), pps_nal().into())
                .unwrap();
        assert_eq!((format.width(), format.height()), (960, 720));
        assert_eq!(format.profile_idc(), 66);
        assert_eq!(format.codec_string(), "avc1.42c01f");
    }

    #[test]
    fn pps_must_reference_the_sps() {
        let err = FormatDescription::from_parameter_sets(
            sps_nal(960, 720).into(),
            pps_nal_with_ids(0, 2).into(),
        )
        .unwrap_err();
        assert!(matches!(err, DroneError::FormatDescription { .. }));
    }

    #[test]
    fn swapped_sets_are_rejected() {
        let err =
            FormatDescription::from_parameter_sets(pps_nal().into(), sps_nal(960, 720).into())
                .unwrap_err();
        assert!(matches!(err, DroneError::FormatDescription { .. }));
    }

    #[test]
    fn equality_tracks_parameter_bytes() {
        let a = FormatDescription::from_parameter_sets(sps_nal(960, 720).into(), pps_nal().into())
            .unwrap();
        let b = FormatDescription::from_parameter_sets(sps_nal(960, 720).into(), pps_nal().into())
            .unwrap();
        let c = FormatDescription::from_parameter_sets(sps_nal(1280, 720).into(), pps_nal().into())
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
