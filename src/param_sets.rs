//! Parameter-set extraction from a keyframe's format description.

use annexb_codec::{Codec, FormatDescription};
use bytes::Bytes;

use crate::error::ExtractionError;
use crate::nal::ParameterSetKind;

/// The out-of-band parameter sets governing a keyframe, in stream order.
///
/// Captured whole and replaced whole; never merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterSetBundle {
    Avc { sps: Bytes, pps: Bytes },
    Hevc { vps: Bytes, sps: Bytes, pps: Bytes },
}

impl ParameterSetBundle {
    /// Codec whose layout this bundle follows.
    pub fn codec(&self) -> Codec {
        match self {
            Self::Avc { .. } => Codec::H264,
            Self::Hevc { .. } => Codec::Hevc,
        }
    }

    /// Parameter sets in emission order (VPS, SPS, PPS).
    pub fn iter(&self) -> impl Iterator<Item = (ParameterSetKind, &Bytes)> {
        let sets: Vec<(ParameterSetKind, &Bytes)> = match self {
            Self::Avc { sps, pps } => vec![(ParameterSetKind::Sps, sps), (ParameterSetKind::Pps, pps)],
            Self::Hevc { vps, sps, pps } => vec![
                (ParameterSetKind::Vps, vps),
                (ParameterSetKind::Sps, sps),
                (ParameterSetKind::Pps, pps),
            ],
        };
        sets.into_iter()
    }

    /// Number of parameter sets (2 for AVC, 3 for HEVC).
    pub fn count(&self) -> usize {
        self.codec().parameter_set_count()
    }

    /// Total payload bytes across all sets.
    pub fn payload_len(&self) -> usize {
        self.iter().map(|(_, data)| data.len()).sum()
    }
}

/// Order in which parameter sets sit in a format description.
fn layout(codec: Codec) -> &'static [ParameterSetKind] {
    match codec {
        Codec::H264 => &[ParameterSetKind::Sps, ParameterSetKind::Pps],
        Codec::Hevc => &[
            ParameterSetKind::Vps,
            ParameterSetKind::Sps,
            ParameterSetKind::Pps,
        ],
    }
}

/// Read every parameter set of `codec` from `format`.
///
/// Queries indices in order and stops at the first failure. The returned
/// buffers are copies, so the bundle outlives the description.
pub fn extract(
    format: &dyn FormatDescription,
    codec: Codec,
) -> Result<ParameterSetBundle, ExtractionError> {
    let kinds = layout(codec);
    let query = |index: usize| -> Result<Bytes, ExtractionError> {
        let kind = kinds[index];
        let set = format
            .parameter_set_at(codec, index)
            .map_err(|source| ExtractionError {
                kind,
                index,
                source,
            })?;
        tracing::debug!(
            "{} {}: {} bytes ({} sets in description)",
            codec.name(),
            kind.name(),
            set.data.len(),
            set.count
        );
        Ok(Bytes::copy_from_slice(set.data))
    };

    // Field initializers run in order, so the queries go 0, 1, 2.
    Ok(match codec {
        Codec::H264 => ParameterSetBundle::Avc {
            sps: query(0)?,
            pps: query(1)?,
        },
        Codec::Hevc => ParameterSetBundle::Hevc {
            vps: query(0)?,
            sps: query(1)?,
            pps: query(2)?,
        },
    })
}
