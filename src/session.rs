//! Encoder session controller.
//!
//! Owns one compression session for the lifetime of a recording:
//!
//! ```text
//! Uninitialized --first frame--> Configured --submit--> Encoding
//!       |                                                  |
//!       +------------------- stop ------------------+   stop
//!                                                   v      v
//!                                      Terminated <-- Draining
//! ```
//!
//! The encoder is created lazily from the first frame's dimensions. Frames
//! are submitted under a lock, so at most one submission is in flight and
//! the encoder's own queue depth bounds the backlog. Compressed output
//! flows through a [`WriterThread`] that owns the sink.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use annexb_codec::{EncoderFactory, RawFrame, VideoEncoder};

use crate::config::RecorderConfig;
use crate::error::SessionError;
use crate::pipeline::{PipelineStats, SamplePipeline, WriterThread};
use crate::writer::create_sink;

/// Lifecycle of a [`Controller`]. There is no way back from `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Configured,
    Encoding,
    Draining,
    Terminated,
}

/// Counters kept on the submission side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames the encoder accepted.
    pub frames_submitted: u64,
    /// Frames the encoder refused.
    pub submit_failures: u64,
    /// Frames rejected before submission (size mismatch, short data).
    pub rejected_frames: u64,
}

/// What a finished recording produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub output_path: PathBuf,
    /// Session dimensions, if any frame arrived.
    pub dimensions: Option<(u32, u32)>,
    pub session: SessionStats,
    pub pipeline: PipelineStats,
}

struct Inner<E> {
    state: SessionState,
    encoder: Option<E>,
    writer: Option<WriterThread>,
    dimensions: Option<(u32, u32)>,
    stats: SessionStats,
}

impl<E: VideoEncoder> Inner<E> {
    /// Flush the encoder, release it, then drain and close the sink.
    fn shutdown(&mut self) -> Result<PipelineStats, SessionError> {
        if let Some(mut encoder) = self.encoder.take() {
            self.state = SessionState::Draining;
            tracing::info!("Draining encoder");
            if let Err(e) = encoder.flush() {
                tracing::warn!("Encoder flush failed: {}", e);
            }
            drop(encoder);
        }
        let result = match self.writer.take() {
            Some(writer) => writer.finish(),
            None => Ok(PipelineStats::default()),
        };
        self.state = SessionState::Terminated;
        result
    }
}

/// Drives one recording from first frame to closed file.
pub struct Controller<F: EncoderFactory> {
    config: RecorderConfig,
    factory: F,
    inner: Mutex<Inner<F::Encoder>>,
}

impl<F: EncoderFactory> Controller<F> {
    /// Open the output sink and start the writer.
    ///
    /// Any existing file at the output path is replaced with an empty one.
    /// The encoder itself is created when the first frame arrives.
    pub fn start(config: RecorderConfig, factory: F) -> Result<Self, SessionError> {
        let sink = create_sink(config.output_path())?;
        let writer = WriterThread::spawn(SamplePipeline::new(config.selected_codec(), sink))
            .map_err(SessionError::WriterSpawn)?;

        tracing::info!(
            "Recording {} to {}",
            config.selected_codec().name(),
            config.output_path().display()
        );

        Ok(Self {
            config,
            factory,
            inner: Mutex::new(Inner {
                state: SessionState::Uninitialized,
                encoder: None,
                writer: Some(writer),
                dimensions: None,
                stats: SessionStats::default(),
            }),
        })
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Session dimensions once the encoder has been configured.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.lock().dimensions
    }

    /// Submit one captured frame.
    ///
    /// Blocks until the encoder has accepted it. Per-frame problems are
    /// logged and counted; only session-level failures are returned.
    pub fn submit_frame(&self, frame: &RawFrame<'_>) -> Result<(), SessionError> {
        let mut inner = self.lock();

        match inner.state {
            SessionState::Draining | SessionState::Terminated => {
                return Err(SessionError::Terminated)
            }
            SessionState::Uninitialized => self.configure(&mut inner, frame.width, frame.height)?,
            SessionState::Configured | SessionState::Encoding => {}
        }

        if inner.writer.as_ref().is_some_and(WriterThread::has_failed) {
            return Err(SessionError::SinkWrite(std::io::Error::new(
                std::io::ErrorKind::Other,
                "output sink closed after a write failure",
            )));
        }

        if inner.dimensions != Some((frame.width, frame.height)) {
            inner.stats.rejected_frames += 1;
            tracing::warn!(
                "Dropping {}x{} frame; session is {:?}",
                frame.width,
                frame.height,
                inner.dimensions
            );
            return Ok(());
        }
        if let Err(e) = frame.validate() {
            inner.stats.rejected_frames += 1;
            tracing::warn!("Dropping frame at {}us: {}", frame.timestamp_us, e);
            return Ok(());
        }

        let Some(encoder) = inner.encoder.as_mut() else {
            return Err(SessionError::Terminated);
        };
        match encoder.submit(frame) {
            Ok(()) => {
                inner.stats.frames_submitted += 1;
                inner.state = SessionState::Encoding;
            }
            Err(e) => {
                inner.stats.submit_failures += 1;
                tracing::warn!("Encoder refused frame at {}us: {}", frame.timestamp_us, e);
            }
        }
        Ok(())
    }

    fn configure(
        &self,
        inner: &mut Inner<F::Encoder>,
        width: u32,
        height: u32,
    ) -> Result<(), SessionError> {
        let encoder_config = self.config.encoder_config(width, height);
        tracing::info!(
            "Configuring {} encoder: {}x{}, {} profile, keyframe every {} frames, {} bps",
            encoder_config.codec.name(),
            width,
            height,
            encoder_config.profile_level.name(),
            encoder_config.max_keyframe_interval,
            encoder_config.average_bitrate
        );

        let created = match encoder_config.validate() {
            Ok(()) => match inner.writer.as_ref() {
                Some(writer) => self.factory.create(&encoder_config, writer.handler()),
                None => return Err(SessionError::Terminated),
            },
            Err(e) => Err(e),
        };

        match created {
            Ok(encoder) => {
                inner.encoder = Some(encoder);
                inner.dimensions = Some((width, height));
                inner.state = SessionState::Configured;
                Ok(())
            }
            Err(e) => {
                tracing::error!("Encoder configuration failed: {}", e);
                if let Err(close) = inner.shutdown() {
                    tracing::warn!("Closing output after configuration failure: {}", close);
                }
                Err(SessionError::Configuration(e))
            }
        }
    }

    /// Stop recording: complete every accepted frame, release the encoder
    /// and close the sink. The controller cannot be restarted.
    pub fn stop(&self) -> Result<SessionSummary, SessionError> {
        let mut inner = self.lock();
        if inner.state == SessionState::Terminated {
            return Err(SessionError::Terminated);
        }

        let pipeline = inner.shutdown()?;
        tracing::info!(
            "Recording stopped: {} frames submitted, {} samples, {} bytes written",
            inner.stats.frames_submitted,
            pipeline.samples,
            pipeline.bytes_written
        );

        Ok(SessionSummary {
            output_path: self.config.output_path().to_path_buf(),
            dimensions: inner.dimensions,
            session: inner.stats,
            pipeline,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<F::Encoder>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<F: EncoderFactory> Drop for Controller<F> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if inner.state != SessionState::Terminated {
            tracing::warn!("Controller dropped without stop; finalizing output");
            if let Err(e) = inner.shutdown() {
                tracing::error!("Finalizing output failed: {}", e);
            }
        }
    }
}
