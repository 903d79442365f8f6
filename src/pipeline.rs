//! Per-sample routing from encoder output to the Annex B writer.
//!
//! [`SamplePipeline`] is the single owner of the output sink. In a live
//! session it runs on a dedicated writer thread fed by a [`ChannelHandler`],
//! which the encoder calls from its own completion context.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use annexb_codec::{Codec, CompressedSample, CompressionOutputHandler, EncoderOutput};

use crate::error::SessionError;
use crate::nal::reframe;
use crate::param_sets::{extract, ParameterSetBundle};
use crate::writer::AnnexBWriter;

/// Counters describing what the pipeline saw and wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Compressed samples processed.
    pub samples: u64,
    /// Samples flagged as keyframes.
    pub keyframes: u64,
    /// NAL units written from sample data.
    pub units_written: u64,
    /// Parameter-set records written from extracted bundles.
    pub parameter_set_records: u64,
    /// Total bytes appended to the sink.
    pub bytes_written: u64,
    /// Frames the encoder reported as dropped.
    pub dropped_frames: u64,
    /// Completions with a non-success status.
    pub failed_outputs: u64,
    /// Successful completions that carried no sample.
    pub empty_outputs: u64,
    /// Keyframes whose parameter sets could not be extracted.
    pub extraction_failures: u64,
    /// Keyframes delivered without a format description.
    pub missing_format: u64,
    /// Samples that ended in a malformed length record.
    pub truncated_samples: u64,
    /// Samples whose timestamp went backwards.
    pub out_of_order_samples: u64,
}

/// Turns encoder completions into Annex B records on one sink.
pub struct SamplePipeline<W: Write> {
    codec: Codec,
    writer: AnnexBWriter<W>,
    last_pts_us: Option<u64>,
    stats: PipelineStats,
}

impl<W: Write> SamplePipeline<W> {
    pub fn new(codec: Codec, sink: W) -> Self {
        Self {
            codec,
            writer: AnnexBWriter::new(sink),
            last_pts_us: None,
            stats: PipelineStats::default(),
        }
    }

    /// Handle one encoder completion.
    ///
    /// Drops, failures and empty completions are logged and skipped. Only
    /// sink I/O errors are returned.
    pub fn handle_output(&mut self, output: EncoderOutput) -> io::Result<()> {
        if !output.is_success() {
            self.stats.failed_outputs += 1;
            tracing::warn!("Encoder reported status {}, skipping frame", output.status);
            return Ok(());
        }
        if output.dropped {
            self.stats.dropped_frames += 1;
            tracing::warn!("Encoder dropped a frame");
            return Ok(());
        }
        match output.sample {
            Some(sample) => self.process_sample(sample),
            None => {
                self.stats.empty_outputs += 1;
                tracing::warn!("Encoder completed without a sample");
                Ok(())
            }
        }
    }

    /// Write one sample: parameter sets first on keyframes, then every NAL
    /// unit in order.
    pub fn process_sample(&mut self, sample: CompressedSample) -> io::Result<()> {
        self.stats.samples += 1;

        if let Some(last) = self.last_pts_us {
            if sample.pts_us < last {
                self.stats.out_of_order_samples += 1;
                tracing::warn!(
                    "Sample at {}us arrived after {}us; writing in arrival order",
                    sample.pts_us,
                    last
                );
            }
        }
        self.last_pts_us = Some(self.last_pts_us.map_or(sample.pts_us, |l| l.max(sample.pts_us)));

        if sample.is_keyframe {
            self.stats.keyframes += 1;
            self.write_parameter_sets(&sample)?;
        }

        let mut units = reframe(self.codec, sample.data);
        for unit in units.by_ref() {
            self.writer.on_unit(&unit)?;
            self.stats.units_written += 1;
        }
        if units.truncation().is_some() {
            self.stats.truncated_samples += 1;
        }

        tracing::debug!(
            "Wrote sample at {}us ({}keyframe)",
            sample.pts_us,
            if sample.is_keyframe { "" } else { "non-" }
        );
        Ok(())
    }

    fn write_parameter_sets(&mut self, sample: &CompressedSample) -> io::Result<()> {
        let Some(format) = sample.format.as_deref() else {
            self.stats.missing_format += 1;
            tracing::warn!(
                "Keyframe at {}us has no format description; no parameter sets written",
                sample.pts_us
            );
            return Ok(());
        };

        match extract(format, self.codec) {
            Ok(bundle) => self.writer.on_key_frame(bundle),
            Err(e) => {
                self.stats.extraction_failures += 1;
                tracing::warn!(
                    "Keyframe at {}us: {} ({}); keeping previous parameter sets",
                    sample.pts_us,
                    e,
                    e.source
                );
                Ok(())
            }
        }
    }

    /// Most recently extracted parameter sets.
    pub fn last_bundle(&self) -> Option<&ParameterSetBundle> {
        self.writer.last_bundle()
    }

    pub fn stats(&self) -> PipelineStats {
        let writer = self.writer.stats();
        PipelineStats {
            parameter_set_records: writer.parameter_set_records,
            bytes_written: writer.bytes_written,
            ..self.stats
        }
    }

    /// Flush the sink and return it with the final counters.
    pub fn finish(self) -> io::Result<(W, PipelineStats)> {
        let stats = self.stats();
        let sink = self.writer.finish()?;
        Ok((sink, stats))
    }
}

/// Messages consumed by the writer thread.
#[derive(Debug)]
pub enum PipelineMessage {
    Output(EncoderOutput),
    Finish,
}

/// Forwards encoder completions to the writer thread.
pub struct ChannelHandler {
    tx: Mutex<mpsc::Sender<PipelineMessage>>,
}

impl CompressionOutputHandler for ChannelHandler {
    fn on_output(&self, output: EncoderOutput) {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        if tx.send(PipelineMessage::Output(output)).is_err() {
            tracing::debug!("Writer thread gone, discarding encoder output");
        }
    }
}

/// A [`SamplePipeline`] running on its own thread.
pub struct WriterThread {
    tx: mpsc::Sender<PipelineMessage>,
    handle: JoinHandle<io::Result<PipelineStats>>,
    failed: Arc<AtomicBool>,
}

impl WriterThread {
    /// Move `pipeline` onto a new thread that processes messages in
    /// arrival order until [`finish`](Self::finish).
    pub fn spawn<W>(pipeline: SamplePipeline<W>) -> io::Result<Self>
    where
        W: Write + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<PipelineMessage>();
        let failed = Arc::new(AtomicBool::new(false));
        let failed_flag = failed.clone();

        let handle = std::thread::Builder::new()
            .name("annexb-writer".to_string())
            .spawn(move || {
                let result = run_writer(pipeline, rx);
                if let Err(ref e) = result {
                    failed_flag.store(true, Ordering::SeqCst);
                    tracing::error!("Output sink failed: {}", e);
                }
                result
            })?;

        Ok(Self { tx, handle, failed })
    }

    /// A handler that feeds this thread. Bind it to the encoder.
    pub fn handler(&self) -> Arc<ChannelHandler> {
        Arc::new(ChannelHandler {
            tx: Mutex::new(self.tx.clone()),
        })
    }

    /// Set once the sink has failed; the thread has stopped writing.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Process everything queued so far, flush the sink and stop.
    pub fn finish(self) -> Result<PipelineStats, SessionError> {
        // Fails only if the thread already exited; join reports why.
        let _ = self.tx.send(PipelineMessage::Finish);
        match self.handle.join() {
            Ok(Ok(stats)) => Ok(stats),
            Ok(Err(e)) => Err(SessionError::SinkWrite(e)),
            Err(_) => Err(SessionError::WriterPanicked),
        }
    }
}

fn run_writer<W: Write>(
    mut pipeline: SamplePipeline<W>,
    rx: mpsc::Receiver<PipelineMessage>,
) -> io::Result<PipelineStats> {
    // Also ends when every sender is gone.
    while let Ok(message) = rx.recv() {
        match message {
            PipelineMessage::Output(output) => pipeline.handle_output(output)?,
            PipelineMessage::Finish => break,
        }
    }
    let (_, stats) = pipeline.finish()?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use annexb_codec::StaticFormatDescription;
    use bytes::Bytes;

    fn hevc_format() -> Option<Box<dyn annexb_codec::FormatDescription>> {
        Some(Box::new(StaticFormatDescription::hevc(
            b"V1".to_vec(),
            b"S1".to_vec(),
            b"P1".to_vec(),
        )))
    }

    #[test]
    fn test_keyframe_sample_hevc() {
        let mut pipeline = SamplePipeline::new(Codec::Hevc, Vec::new());
        let sample = CompressedSample::keyframe(
            Bytes::from_static(&[0, 0, 0, 3, 0xAA, 0xBB, 0xCC]),
            0,
            hevc_format(),
        );
        pipeline.handle_output(EncoderOutput::sample(sample)).unwrap();

        let (out, stats) = pipeline.finish().unwrap();
        assert_eq!(
            out,
            vec![
                0, 0, 0, 1, b'V', b'1', 0, 0, 0, 1, b'S', b'1', 0, 0, 0, 1, b'P', b'1', 0, 0, 0,
                1, 0xAA, 0xBB, 0xCC
            ]
        );
        assert_eq!(stats.keyframes, 1);
        assert_eq!(stats.parameter_set_records, 3);
        assert_eq!(stats.units_written, 1);
        assert_eq!(stats.bytes_written, out.len() as u64);
    }

    #[test]
    fn test_delta_sample_has_no_parameter_sets() {
        let mut pipeline = SamplePipeline::new(Codec::Hevc, Vec::new());
        pipeline
            .process_sample(CompressedSample::keyframe(
                Bytes::from_static(&[0, 0, 0, 1, 0x26]),
                0,
                hevc_format(),
            ))
            .unwrap();
        let before = pipeline.stats().bytes_written as usize;

        pipeline
            .process_sample(CompressedSample::delta(
                Bytes::from_static(&[0, 0, 0, 2, 0x11, 0x22, 0, 0, 0, 1, 0x33]),
                33_333,
            ))
            .unwrap();

        let (out, stats) = pipeline.finish().unwrap();
        assert_eq!(&out[before..], &[0, 0, 0, 1, 0x11, 0x22, 0, 0, 0, 1, 0x33]);
        assert_eq!(stats.parameter_set_records, 3);
        assert!(stats.samples == 2 && stats.keyframes == 1);
    }

    #[test]
    fn test_failed_extraction_after_good_keyframe() {
        let mut pipeline = SamplePipeline::new(Codec::Hevc, Vec::new());
        pipeline
            .process_sample(CompressedSample::keyframe(
                Bytes::from_static(&[0, 0, 0, 1, 0x26]),
                0,
                hevc_format(),
            ))
            .unwrap();

        let failing = StaticFormatDescription::hevc(b"V2".to_vec(), b"S2".to_vec(), b"P2".to_vec())
            .failing_at(2, -12712);
        pipeline
            .process_sample(CompressedSample::keyframe(
                Bytes::from_static(&[0, 0, 0, 1, 0x27]),
                33_333,
                Some(Box::new(failing)),
            ))
            .unwrap();
        pipeline
            .process_sample(CompressedSample::delta(
                Bytes::from_static(&[0, 0, 0, 0]),
                66_666,
            ))
            .unwrap();

        assert_eq!(
            pipeline.last_bundle(),
            Some(&ParameterSetBundle::Hevc {
                vps: Bytes::from_static(b"V1"),
                sps: Bytes::from_static(b"S1"),
                pps: Bytes::from_static(b"P1"),
            })
        );

        let (out, stats) = pipeline.finish().unwrap();
        assert_eq!(
            out,
            vec![
                0, 0, 0, 1, b'V', b'1', 0, 0, 0, 1, b'S', b'1', 0, 0, 0, 1, b'P', b'1', 0, 0, 0,
                1, 0x26, 0, 0, 0, 1, 0x27, 0, 0, 0, 1
            ]
        );
        assert_eq!(stats.parameter_set_records, 3);
        assert_eq!(stats.extraction_failures, 1);
        assert_eq!(stats.keyframes, 2);
        assert_eq!(stats.units_written, 3);
    }

    #[test]
    fn test_drops_and_failures_are_skipped() {
        let mut pipeline = SamplePipeline::new(Codec::H264, Vec::new());
        pipeline.handle_output(EncoderOutput::dropped()).unwrap();
        pipeline.handle_output(EncoderOutput::failed(-12902)).unwrap();
        pipeline
            .handle_output(EncoderOutput {
                status: annexb_codec::STATUS_OK,
                dropped: false,
                sample: None,
            })
            .unwrap();

        let (out, stats) = pipeline.finish().unwrap();
        assert!(out.is_empty());
        assert_eq!(stats.dropped_frames, 1);
        assert_eq!(stats.failed_outputs, 1);
        assert_eq!(stats.empty_outputs, 1);
        assert_eq!(stats.samples, 0);
    }

    #[test]
    fn test_keyframe_without_format() {
        let mut pipeline = SamplePipeline::new(Codec::H264, Vec::new());
        pipeline
            .process_sample(CompressedSample::keyframe(
                Bytes::from_static(&[0, 0, 0, 1, 0x65]),
                0,
                None,
            ))
            .unwrap();
        let (out, stats) = pipeline.finish().unwrap();
        assert_eq!(out, vec![0, 0, 0, 1, 0x65]);
        assert_eq!(stats.missing_format, 1);
    }

    #[test]
    fn test_truncated_sample_counted() {
        let mut pipeline = SamplePipeline::new(Codec::H264, Vec::new());
        pipeline
            .process_sample(CompressedSample::delta(
                Bytes::from_static(&[0, 0, 0, 1, 0x41, 0, 0, 0, 8, 0x01]),
                0,
            ))
            .unwrap();
        let (out, stats) = pipeline.finish().unwrap();
        assert_eq!(out, vec![0, 0, 0, 1, 0x41]);
        assert_eq!(stats.truncated_samples, 1);
        assert_eq!(stats.units_written, 1);
    }

    #[test]
    fn test_out_of_order_detected_but_written() {
        let mut pipeline = SamplePipeline::new(Codec::H264, Vec::new());
        for pts in [0, 66_666, 33_333, 100_000] {
            pipeline
                .process_sample(CompressedSample::delta(
                    Bytes::from_static(&[0, 0, 0, 1, 0x41]),
                    pts,
                ))
                .unwrap();
        }
        let stats = pipeline.stats();
        assert_eq!(stats.out_of_order_samples, 1);
        assert_eq!(stats.units_written, 4);
    }

    #[test]
    fn test_writer_thread_serializes_outputs() {
        let (tx, rx) = mpsc::channel::<Vec<u8>>();

        struct Capture(Vec<u8>, mpsc::Sender<Vec<u8>>);
        impl Write for Capture {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                let _ = self.1.send(self.0.clone());
                Ok(())
            }
        }

        let writer =
            WriterThread::spawn(SamplePipeline::new(Codec::H264, Capture(Vec::new(), tx))).unwrap();
        let handler = writer.handler();

        let threads: Vec<_> = (0..4u8)
            .map(|i| {
                let handler = handler.clone();
                std::thread::spawn(move || {
                    handler.on_output(EncoderOutput::sample(CompressedSample::delta(
                        vec![0, 0, 0, 1, i],
                        i as u64,
                    )));
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let stats = writer.finish().unwrap();
        assert_eq!(stats.units_written, 4);

        let out = rx.recv().unwrap();
        let mut payloads: Vec<u8> = crate::nal::split_annex_b(&out)
            .into_iter()
            .map(|p| p[0])
            .collect();
        payloads.sort_unstable();
        assert_eq!(payloads, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_handler_survives_poisoned_sender() {
        let writer = WriterThread::spawn(SamplePipeline::new(Codec::H264, Vec::new())).unwrap();
        let handler = writer.handler();

        let poisoner = handler.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.tx.lock().unwrap();
            panic!("sender poisoned");
        })
        .join();
        assert!(handler.tx.is_poisoned());

        handler.on_output(EncoderOutput::sample(CompressedSample::delta(
            vec![0, 0, 0, 1, 0x41],
            0,
        )));
        let stats = writer.finish().unwrap();
        assert_eq!(stats.units_written, 1);
    }

    #[test]
    fn test_writer_thread_reports_sink_failure() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::Other, "disk full"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let writer = WriterThread::spawn(SamplePipeline::new(Codec::H264, Broken)).unwrap();
        writer
            .handler()
            .on_output(EncoderOutput::sample(CompressedSample::delta(
                vec![0, 0, 0, 1, 0x41],
                0,
            )));
        let err = writer.finish().unwrap_err();
        assert!(matches!(err, SessionError::SinkWrite(_)));
    }
}
