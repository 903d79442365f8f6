//! Contracts between the recorder and an encoder backend.

use std::sync::Arc;

use crate::{Codec, CodecError, EncoderConfig, EncoderOutput, RawFrame};

/// A parameter set as reported by a format description.
///
/// `data` is the NAL payload (no length prefix, no start code) and is only
/// valid while the description is borrowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterSetRef<'a> {
    pub data: &'a [u8],
    /// Number of parameter sets the description holds in total.
    pub count: usize,
}

/// Read access to the parameter sets of a keyframe's format description.
///
/// Backends implement this over their own format handle; the handle is only
/// guaranteed valid for the sample that produced it.
pub trait FormatDescription: Send {
    /// Query the parameter set at `index` using the `codec`'s layout
    /// (AVC: 0 = SPS, 1 = PPS; HEVC: 0 = VPS, 1 = SPS, 2 = PPS).
    fn parameter_set_at(&self, codec: Codec, index: usize)
        -> Result<ParameterSetRef<'_>, CodecError>;
}

/// Receives completion events from an encoder.
///
/// Bound once when the session is created; called on an encoder-owned
/// thread, possibly concurrently with frame submission.
pub trait CompressionOutputHandler: Send + Sync {
    fn on_output(&self, output: EncoderOutput);
}

impl<F> CompressionOutputHandler for F
where
    F: Fn(EncoderOutput) + Send + Sync,
{
    fn on_output(&self, output: EncoderOutput) {
        self(output)
    }
}

/// Trait for video encoders.
///
/// Frames are submitted synchronously; compressed output is delivered
/// asynchronously to the [`CompressionOutputHandler`] the encoder was
/// created with.
pub trait VideoEncoder: Send {
    /// Submit one frame. Returns once the encoder has accepted it.
    fn submit(&mut self, frame: &RawFrame<'_>) -> Result<(), CodecError>;

    /// Complete every frame submitted so far.
    ///
    /// All outputs for accepted frames have been delivered to the handler
    /// when this returns.
    fn flush(&mut self) -> Result<(), CodecError>;

    /// Returns the codec being used.
    fn codec(&self) -> Codec;

    /// Returns the configured dimensions (width, height).
    fn dimensions(&self) -> (u32, u32);
}

/// Creates configured encoder sessions.
pub trait EncoderFactory: Send + Sync {
    type Encoder: VideoEncoder;

    /// Create and configure a session. Errors here are fatal to the
    /// recording.
    fn create(
        &self,
        config: &EncoderConfig,
        handler: Arc<dyn CompressionOutputHandler>,
    ) -> Result<Self::Encoder, CodecError>;
}
