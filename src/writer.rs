//! Annex B stream writer.
//!
//! Every record that reaches the sink is `00 00 00 01` followed by one NAL
//! payload. Nothing else is ever written, and nothing written is revisited.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::error::SessionError;
use crate::nal::{NalUnit, START_CODE};
use crate::param_sets::ParameterSetBundle;

/// Counters kept by [`AnnexBWriter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Start-code-prefixed records written, parameter sets included.
    pub records: u64,
    /// Records that carried a parameter set from a bundle.
    pub parameter_set_records: u64,
    /// Total bytes appended to the sink.
    pub bytes_written: u64,
}

/// Serializes NAL units to an append-only sink in Annex B form.
///
/// Also remembers the most recent parameter-set bundle for diagnostics.
pub struct AnnexBWriter<W: Write> {
    sink: W,
    last_bundle: Option<ParameterSetBundle>,
    stats: WriterStats,
}

impl<W: Write> AnnexBWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            last_bundle: None,
            stats: WriterStats::default(),
        }
    }

    /// Emit a keyframe's parameter sets (VPS, SPS, PPS order) and cache
    /// the bundle.
    ///
    /// The full bundle is written every time, changed or not.
    pub fn on_key_frame(&mut self, bundle: ParameterSetBundle) -> io::Result<()> {
        for (_, data) in bundle.iter() {
            self.write_record(data)?;
            self.stats.parameter_set_records += 1;
        }

        match &self.last_bundle {
            Some(previous) if *previous != bundle => {
                tracing::debug!(
                    "Parameter sets changed ({} -> {} bytes)",
                    previous.payload_len(),
                    bundle.payload_len()
                );
            }
            None => {
                tracing::debug!(
                    "First {} parameter sets: {} bytes",
                    bundle.codec().name(),
                    bundle.payload_len()
                );
            }
            _ => {}
        }
        self.last_bundle = Some(bundle);
        Ok(())
    }

    /// Emit one NAL unit.
    pub fn on_unit(&mut self, unit: &NalUnit) -> io::Result<()> {
        self.write_record(&unit.data)
    }

    fn write_record(&mut self, payload: &[u8]) -> io::Result<()> {
        self.sink.write_all(&START_CODE)?;
        self.sink.write_all(payload)?;
        self.stats.records += 1;
        self.stats.bytes_written += (START_CODE.len() + payload.len()) as u64;
        Ok(())
    }

    /// Most recent bundle passed to [`on_key_frame`](Self::on_key_frame).
    pub fn last_bundle(&self) -> Option<&ParameterSetBundle> {
        self.last_bundle.as_ref()
    }

    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    /// Flush and hand back the sink.
    pub fn finish(mut self) -> io::Result<W> {
        self.sink.flush()?;
        Ok(self.sink)
    }
}

/// Create a fresh, empty output file at `path`, discarding any previous
/// contents.
pub fn create_sink(path: &Path) -> Result<BufWriter<File>, SessionError> {
    let file = File::create(path).map_err(|source| SessionError::SinkOpen {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!("Writing elementary stream to {}", path.display());
    Ok(BufWriter::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nal::NalKind;
    use bytes::Bytes;

    fn unit(data: &'static [u8]) -> NalUnit {
        NalUnit {
            kind: NalKind::Coded,
            data: Bytes::from_static(data),
        }
    }

    fn hevc_bundle() -> ParameterSetBundle {
        ParameterSetBundle::Hevc {
            vps: Bytes::from_static(b"V1"),
            sps: Bytes::from_static(b"S1"),
            pps: Bytes::from_static(b"P1"),
        }
    }

    #[test]
    fn test_keyframe_then_units() {
        let mut writer = AnnexBWriter::new(Vec::new());
        writer.on_key_frame(hevc_bundle()).unwrap();
        writer.on_unit(&unit(&[0xAA, 0xBB, 0xCC])).unwrap();

        let stats = writer.stats();
        assert_eq!(stats.records, 4);
        assert_eq!(stats.parameter_set_records, 3);
        assert_eq!(stats.bytes_written, 4 * 4 + 2 * 3 + 3);

        let out = writer.finish().unwrap();
        let mut expected = Vec::new();
        let payloads: [&[u8]; 4] = [b"V1", b"S1", b"P1", &[0xAA, 0xBB, 0xCC]];
        for payload in payloads {
            expected.extend_from_slice(&START_CODE);
            expected.extend_from_slice(payload);
        }
        assert_eq!(out, expected);
    }

    #[test]
    fn test_avc_bundle_writes_two_records() {
        let mut writer = AnnexBWriter::new(Vec::new());
        writer
            .on_key_frame(ParameterSetBundle::Avc {
                sps: Bytes::from_static(&[0x67, 0x42]),
                pps: Bytes::from_static(&[0x68, 0xCE]),
            })
            .unwrap();
        assert_eq!(
            writer.get_ref(),
            &vec![0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68, 0xCE]
        );
        assert_eq!(writer.stats().parameter_set_records, 2);
    }

    #[test]
    fn test_empty_unit_writes_start_code_only() {
        let mut writer = AnnexBWriter::new(Vec::new());
        writer.on_unit(&unit(&[])).unwrap();
        assert_eq!(writer.get_ref(), &START_CODE.to_vec());
    }

    #[test]
    fn test_unchanged_bundle_is_rewritten() {
        let mut writer = AnnexBWriter::new(Vec::new());
        writer.on_key_frame(hevc_bundle()).unwrap();
        writer.on_key_frame(hevc_bundle()).unwrap();
        assert_eq!(writer.stats().parameter_set_records, 6);
        assert_eq!(writer.last_bundle(), Some(&hevc_bundle()));
    }

    #[test]
    fn test_bundle_replaced_wholesale() {
        let mut writer = AnnexBWriter::new(Vec::new());
        writer.on_key_frame(hevc_bundle()).unwrap();
        let next = ParameterSetBundle::Hevc {
            vps: Bytes::from_static(b"V2"),
            sps: Bytes::from_static(b"S2"),
            pps: Bytes::from_static(b"P2"),
        };
        writer.on_key_frame(next.clone()).unwrap();
        assert_eq!(writer.last_bundle(), Some(&next));
    }

    #[test]
    fn test_create_sink_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temp.h265");
        std::fs::write(&path, b"stale contents").unwrap();

        let sink = create_sink(&path).unwrap();
        let mut writer = AnnexBWriter::new(sink);
        writer.on_unit(&unit(&[0x01])).unwrap();
        writer.finish().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), vec![0, 0, 0, 1, 0x01]);
    }

    #[test]
    fn test_create_sink_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.h264");
        let err = create_sink(&path).unwrap_err();
        assert!(matches!(err, SessionError::SinkOpen { .. }));
    }
}
