//! In-memory format descriptions.

use crate::{Codec, CodecError, FormatDescription, ParameterSetRef};

/// Status reported for a parameter set index that does not exist.
pub const STATUS_OUT_OF_RANGE: i32 = -12710;

/// A format description whose parameter sets are held in memory.
///
/// Used when replaying captured length-prefixed dumps and by backends that
/// learn parameter sets out of band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticFormatDescription {
    codec: Codec,
    sets: Vec<Vec<u8>>,
    failing: Option<(usize, i32)>,
}

impl StaticFormatDescription {
    /// AVC description holding SPS and PPS.
    #[must_use]
    pub fn h264(sps: impl Into<Vec<u8>>, pps: impl Into<Vec<u8>>) -> Self {
        Self {
            codec: Codec::H264,
            sets: vec![sps.into(), pps.into()],
            failing: None,
        }
    }

    /// HEVC description holding VPS, SPS and PPS.
    #[must_use]
    pub fn hevc(
        vps: impl Into<Vec<u8>>,
        sps: impl Into<Vec<u8>>,
        pps: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            codec: Codec::Hevc,
            sets: vec![vps.into(), sps.into(), pps.into()],
            failing: None,
        }
    }

    /// Make the query at `index` report `status` instead of data.
    #[must_use]
    pub fn failing_at(mut self, index: usize, status: i32) -> Self {
        self.failing = Some((index, status));
        self
    }

    /// Codec this description was built for.
    #[must_use]
    pub fn codec(&self) -> Codec {
        self.codec
    }
}

impl FormatDescription for StaticFormatDescription {
    fn parameter_set_at(
        &self,
        codec: Codec,
        index: usize,
    ) -> Result<ParameterSetRef<'_>, CodecError> {
        if codec != self.codec {
            return Err(CodecError::UnsupportedCodec);
        }
        if let Some((failing_index, status)) = self.failing {
            if failing_index == index {
                return Err(CodecError::ParameterSetQuery { index, status });
            }
        }
        let data = self.sets.get(index).ok_or(CodecError::ParameterSetQuery {
            index,
            status: STATUS_OUT_OF_RANGE,
        })?;
        Ok(ParameterSetRef {
            data,
            count: self.sets.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hevc_indices() {
        let desc = StaticFormatDescription::hevc(vec![0x40], vec![0x42], vec![0x44]);
        let sps = desc.parameter_set_at(Codec::Hevc, 1).unwrap();
        assert_eq!(sps.data, &[0x42]);
        assert_eq!(sps.count, 3);
        assert!(matches!(
            desc.parameter_set_at(Codec::Hevc, 3),
            Err(CodecError::ParameterSetQuery { index: 3, .. })
        ));
    }

    #[test]
    fn test_codec_mismatch() {
        let desc = StaticFormatDescription::h264(vec![0x67], vec![0x68]);
        assert!(matches!(
            desc.parameter_set_at(Codec::Hevc, 0),
            Err(CodecError::UnsupportedCodec)
        ));
    }

    #[test]
    fn test_failing_index() {
        let desc = StaticFormatDescription::h264(vec![0x67], vec![0x68]).failing_at(1, -50);
        assert!(desc.parameter_set_at(Codec::H264, 0).is_ok());
        assert!(matches!(
            desc.parameter_set_at(Codec::H264, 1),
            Err(CodecError::ParameterSetQuery { index: 1, status: -50 })
        ));
    }
}
