//! NAL unit reframing between length-prefixed (AVCC) and start-code (Annex B) form.
//!
//! Encoders hand out pictures as a sequence of `[4-byte big-endian length][payload]`
//! records. [`Reframer`] walks such a buffer and yields each payload as a
//! [`NalUnit`] without copying; [`NalUnit::to_annex_b`] and
//! [`split_annex_b`] cover the start-code side.

use annexb_codec::Codec;
use bytes::Bytes;

/// Annex B start code written in front of every NAL unit.
pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Width of the big-endian length field in front of each AVCC record.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// H.264 NAL unit type constants.
pub mod avc_nal_type {
    /// Sequence parameter set
    pub const SPS: u8 = 7;
    /// Picture parameter set
    pub const PPS: u8 = 8;
}

/// HEVC NAL unit type constants.
pub mod hevc_nal_type {
    /// Video parameter set
    pub const VPS: u8 = 32;
    /// Sequence parameter set
    pub const SPS: u8 = 33;
    /// Picture parameter set
    pub const PPS: u8 = 34;
}

/// Which out-of-band parameter set a unit carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterSetKind {
    Vps,
    Sps,
    Pps,
}

impl ParameterSetKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Vps => "VPS",
            Self::Sps => "SPS",
            Self::Pps => "PPS",
        }
    }
}

/// Coarse classification of a NAL unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NalKind {
    /// Slice data, SEI and everything else that is not a parameter set.
    Coded,
    /// An in-band parameter set.
    ParameterSet(ParameterSetKind),
}

impl NalKind {
    /// Classify `payload` by its NAL header under `codec`'s header layout.
    ///
    /// Empty payloads have no header and count as coded data.
    #[must_use]
    pub fn classify(codec: Codec, payload: &[u8]) -> Self {
        let Some(&header) = payload.first() else {
            return Self::Coded;
        };
        let kind = match codec {
            Codec::H264 => match header & 0x1F {
                avc_nal_type::SPS => Some(ParameterSetKind::Sps),
                avc_nal_type::PPS => Some(ParameterSetKind::Pps),
                _ => None,
            },
            Codec::Hevc => match (header >> 1) & 0x3F {
                hevc_nal_type::VPS => Some(ParameterSetKind::Vps),
                hevc_nal_type::SPS => Some(ParameterSetKind::Sps),
                hevc_nal_type::PPS => Some(ParameterSetKind::Pps),
                _ => None,
            },
        };
        kind.map_or(Self::Coded, Self::ParameterSet)
    }
}

/// A single NAL unit (payload only, no length prefix, no start code).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NalUnit {
    pub kind: NalKind,
    pub data: Bytes,
}

impl NalUnit {
    /// Returns true if this unit carries a parameter set.
    pub fn is_parameter_set(&self) -> bool {
        matches!(self.kind, NalKind::ParameterSet(_))
    }

    /// Convert NAL unit to Annex B format (with 0x00000001 start code).
    pub fn to_annex_b(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(START_CODE.len() + self.data.len());
        result.extend_from_slice(&START_CODE);
        result.extend_from_slice(&self.data);
        result
    }
}

/// Why a [`Reframer`] stopped before the end of its buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truncation {
    /// Fewer than four bytes were left for a length field.
    PartialLength { offset: usize, remaining: usize },
    /// A record declared more payload than the buffer holds.
    Overrun {
        offset: usize,
        declared: u32,
        available: usize,
    },
}

/// Iterator over the NAL units of a length-prefixed buffer.
///
/// Reads records front to back. A record whose declared length runs past
/// the end of the buffer ends the iteration; everything before it is
/// still yielded. Once finished it stays finished.
#[derive(Debug)]
pub struct Reframer {
    codec: Codec,
    data: Bytes,
    offset: usize,
    done: bool,
    truncation: Option<Truncation>,
}

impl Reframer {
    pub fn new(codec: Codec, data: Bytes) -> Self {
        Self {
            codec,
            data,
            offset: 0,
            done: false,
            truncation: None,
        }
    }

    /// Set once the iterator stopped on a malformed trailing record.
    pub fn truncation(&self) -> Option<Truncation> {
        self.truncation
    }

    fn stop(&mut self, truncation: Option<Truncation>) -> Option<NalUnit> {
        self.done = true;
        if let Some(t) = truncation {
            tracing::warn!(
                "Dropping malformed trailing AVCC record ({} bytes total): {:?}",
                self.data.len(),
                t
            );
            self.truncation = Some(t);
        }
        None
    }
}

impl Iterator for Reframer {
    type Item = NalUnit;

    fn next(&mut self) -> Option<NalUnit> {
        if self.done {
            return None;
        }

        let remaining = self.data.len() - self.offset;
        if remaining == 0 {
            return self.stop(None);
        }
        if remaining < LENGTH_PREFIX_SIZE {
            return self.stop(Some(Truncation::PartialLength {
                offset: self.offset,
                remaining,
            }));
        }

        let header = &self.data[self.offset..self.offset + LENGTH_PREFIX_SIZE];
        let declared = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let available = remaining - LENGTH_PREFIX_SIZE;
        if declared as usize > available {
            return self.stop(Some(Truncation::Overrun {
                offset: self.offset,
                declared,
                available,
            }));
        }

        let start = self.offset + LENGTH_PREFIX_SIZE;
        let end = start + declared as usize;
        self.offset = end;

        let data = self.data.slice(start..end);
        Some(NalUnit {
            kind: NalKind::classify(self.codec, &data),
            data,
        })
    }
}

impl std::iter::FusedIterator for Reframer {}

/// Reframe a length-prefixed buffer into its NAL units.
pub fn reframe(codec: Codec, data: Bytes) -> Reframer {
    Reframer::new(codec, data)
}

/// Split a stream of 4-byte start-code-prefixed records back into payloads.
///
/// Only `00 00 00 01` is recognised as a delimiter, matching what the
/// writer emits. Bytes before the first start code are ignored.
pub fn split_annex_b(data: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + START_CODE.len() <= data.len() {
        if data[i..i + START_CODE.len()] == START_CODE {
            starts.push(i);
            i += START_CODE.len();
        } else {
            i += 1;
        }
    }

    starts
        .iter()
        .enumerate()
        .map(|(idx, &start)| {
            let end = starts.get(idx + 1).copied().unwrap_or(data.len());
            &data[start + START_CODE.len()..end]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn avcc(records: &[&[u8]]) -> Bytes {
        let mut buf = Vec::new();
        for r in records {
            buf.extend_from_slice(&(r.len() as u32).to_be_bytes());
            buf.extend_from_slice(r);
        }
        Bytes::from(buf)
    }

    fn payloads(codec: Codec, data: Bytes) -> Vec<Vec<u8>> {
        reframe(codec, data).map(|n| n.data.to_vec()).collect()
    }

    #[test]
    fn test_reframe_yields_records_in_order() {
        let records: [&[u8]; 3] = [&[0x26, 0x01, 0xAF], &[0x02, 0x01], &[0x4E, 0x01, 0x05, 0xFF]];
        let units = payloads(Codec::Hevc, avcc(&records));
        assert_eq!(units, records.iter().map(|r| r.to_vec()).collect::<Vec<_>>());
    }

    #[test]
    fn test_reframe_empty_buffer() {
        let mut reframer = reframe(Codec::H264, Bytes::new());
        assert!(reframer.next().is_none());
        assert!(reframer.truncation().is_none());
    }

    #[test]
    fn test_reframe_zero_length_records() {
        let records: [&[u8]; 4] = [&[], &[0x41, 0x9A], &[], &[]];
        let units = payloads(Codec::H264, avcc(&records));
        assert_eq!(units, vec![vec![], vec![0x41, 0x9A], vec![], vec![]]);
    }

    #[test]
    fn test_reframe_two_units() {
        let data = Bytes::from_static(&[0, 0, 0, 2, 0x11, 0x22, 0, 0, 0, 1, 0x33]);
        assert_eq!(payloads(Codec::H264, data), vec![vec![0x11, 0x22], vec![0x33]]);
    }

    #[test]
    fn test_reframe_stops_at_overrun() {
        let mut buf = avcc(&[&[0xAA, 0xBB]]).to_vec();
        buf.extend_from_slice(&[0, 0, 0, 9, 0x01, 0x02]);

        let mut reframer = reframe(Codec::H264, Bytes::from(buf));
        assert_eq!(reframer.next().unwrap().data.as_ref(), &[0xAA, 0xBB]);
        assert!(reframer.next().is_none());
        assert_eq!(
            reframer.truncation(),
            Some(Truncation::Overrun {
                offset: 6,
                declared: 9,
                available: 2
            })
        );
        assert!(reframer.next().is_none());
    }

    #[test]
    fn test_reframe_huge_declared_length() {
        let data = Bytes::from_static(&[0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        let mut reframer = reframe(Codec::Hevc, data);
        assert!(reframer.next().is_none());
        assert!(matches!(
            reframer.truncation(),
            Some(Truncation::Overrun { declared: u32::MAX, .. })
        ));
    }

    #[test]
    fn test_reframe_partial_length_field() {
        let mut buf = avcc(&[&[0x65]]).to_vec();
        buf.extend_from_slice(&[0, 0]);

        let mut reframer = reframe(Codec::H264, Bytes::from(buf));
        assert_eq!(reframer.next().unwrap().data.as_ref(), &[0x65]);
        assert!(reframer.next().is_none());
        assert_eq!(
            reframer.truncation(),
            Some(Truncation::PartialLength {
                offset: 5,
                remaining: 2
            })
        );
    }

    #[test]
    fn test_classify_avc() {
        assert_eq!(
            NalKind::classify(Codec::H264, &[0x67, 0x64]),
            NalKind::ParameterSet(ParameterSetKind::Sps)
        );
        assert_eq!(
            NalKind::classify(Codec::H264, &[0x68, 0xEE]),
            NalKind::ParameterSet(ParameterSetKind::Pps)
        );
        assert_eq!(NalKind::classify(Codec::H264, &[0x65, 0x88]), NalKind::Coded);
        assert_eq!(NalKind::classify(Codec::H264, &[]), NalKind::Coded);
    }

    #[test]
    fn test_classify_hevc() {
        assert_eq!(
            NalKind::classify(Codec::Hevc, &[0x40, 0x01]),
            NalKind::ParameterSet(ParameterSetKind::Vps)
        );
        assert_eq!(
            NalKind::classify(Codec::Hevc, &[0x42, 0x01]),
            NalKind::ParameterSet(ParameterSetKind::Sps)
        );
        assert_eq!(
            NalKind::classify(Codec::Hevc, &[0x44, 0x01]),
            NalKind::ParameterSet(ParameterSetKind::Pps)
        );
        // IDR_W_RADL (type 19)
        assert_eq!(NalKind::classify(Codec::Hevc, &[0x26, 0x01]), NalKind::Coded);
        // 0x67 is an AVC SPS header but HEVC type 51
        assert_eq!(NalKind::classify(Codec::Hevc, &[0x67]), NalKind::Coded);
    }

    #[test]
    fn test_nal_unit_to_annex_b() {
        let nal = NalUnit {
            kind: NalKind::Coded,
            data: Bytes::from_static(&[0x65, 0xAA, 0xBB]),
        };
        let annex_b = nal.to_annex_b();
        assert_eq!(&annex_b[..4], &START_CODE);
        assert_eq!(&annex_b[4..], &[0x65, 0xAA, 0xBB]);
        assert!(!nal.is_parameter_set());
    }

    #[test]
    fn test_split_annex_b() {
        let stream = [0, 0, 0, 1, 0x11, 0x22, 0, 0, 0, 1, 0, 0, 0, 1, 0x33];
        let parts = split_annex_b(&stream);
        assert_eq!(parts, vec![&[0x11, 0x22][..], &[][..], &[0x33][..]]);
    }

    #[test]
    fn test_reframe_then_split_round_trip() {
        let records: [&[u8]; 3] = [&[0x40, 0x01, 0x0C], &[], &[0x26, 0x01, 0x80, 0x10]];
        let mut stream = Vec::new();
        for unit in reframe(Codec::Hevc, avcc(&records)) {
            stream.extend_from_slice(&unit.to_annex_b());
        }
        assert_eq!(split_annex_b(&stream), records.to_vec());
    }
}
