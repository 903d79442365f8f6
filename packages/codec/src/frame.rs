//! Frame and sample types flowing into and out of an encoder.

use bytes::Bytes;

use crate::{CodecError, FormatDescription};

/// Pixel format of a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// BGRA with 8 bits per channel (32 bits per pixel).
    Bgra,
    /// NV12 (YUV 4:2:0, planar Y + interleaved UV).
    Nv12,
}

impl Default for PixelFormat {
    fn default() -> Self {
        Self::Bgra
    }
}

/// Calculate expected frame size for given dimensions and format.
#[must_use]
pub fn expected_frame_size(width: u32, height: u32, format: PixelFormat) -> usize {
    let pixels = width as usize * height as usize;
    match format {
        PixelFormat::Bgra => pixels * 4,
        PixelFormat::Nv12 => pixels + pixels / 2, // Y + UV (4:2:0)
    }
}

/// A captured frame, borrowed from the capture source for one submit call.
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format of `data`.
    pub pixel_format: PixelFormat,
    /// Tightly packed pixel data.
    pub data: &'a [u8],
    /// Presentation timestamp in microseconds.
    pub timestamp_us: u64,
    /// Frame duration in microseconds, if the source knows it.
    pub duration_us: Option<u64>,
}

impl<'a> RawFrame<'a> {
    /// Create a frame with no known duration.
    #[must_use]
    pub fn new(
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        data: &'a [u8],
        timestamp_us: u64,
    ) -> Self {
        Self {
            width,
            height,
            pixel_format,
            data,
            timestamp_us,
            duration_us: None,
        }
    }

    /// Set the frame duration.
    #[must_use]
    pub fn with_duration(mut self, duration_us: u64) -> Self {
        self.duration_us = Some(duration_us);
        self
    }

    /// Check that `data` holds a full frame for the declared dimensions.
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.width == 0 || self.height == 0 {
            return Err(CodecError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        let expected = expected_frame_size(self.width, self.height, self.pixel_format);
        if self.data.len() < expected {
            return Err(CodecError::invalid_param(format!(
                "{:?} frame data too short: expected {}, got {}",
                self.pixel_format,
                expected,
                self.data.len()
            )));
        }
        Ok(())
    }
}

/// One compressed picture delivered by the encoder.
///
/// `data` is in length-prefixed form: a sequence of
/// `[4-byte big-endian length][payload]` records.
pub struct CompressedSample {
    /// Length-prefixed NAL units.
    pub data: Bytes,
    /// Whether the picture is decodable on its own.
    pub is_keyframe: bool,
    /// Presentation timestamp in microseconds.
    pub pts_us: u64,
    /// Format description carrying the parameter sets. Present on keyframes.
    pub format: Option<Box<dyn FormatDescription>>,
}

impl CompressedSample {
    /// A sample that is not a keyframe.
    #[must_use]
    pub fn delta(data: impl Into<Bytes>, pts_us: u64) -> Self {
        Self {
            data: data.into(),
            is_keyframe: false,
            pts_us,
            format: None,
        }
    }

    /// A keyframe sample with its format description.
    #[must_use]
    pub fn keyframe(
        data: impl Into<Bytes>,
        pts_us: u64,
        format: Option<Box<dyn FormatDescription>>,
    ) -> Self {
        Self {
            data: data.into(),
            is_keyframe: true,
            pts_us,
            format,
        }
    }
}

impl std::fmt::Debug for CompressedSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressedSample")
            .field("len", &self.data.len())
            .field("is_keyframe", &self.is_keyframe)
            .field("pts_us", &self.pts_us)
            .field("has_format", &self.format.is_some())
            .finish()
    }
}

/// Status value the encoder reports for a successful compression.
pub const STATUS_OK: i32 = 0;

/// One completion event from the encoder.
///
/// A non-success `status` or `dropped = true` carries no sample.
#[derive(Debug)]
pub struct EncoderOutput {
    /// Backend status code, [`STATUS_OK`] on success.
    pub status: i32,
    /// The encoder dropped the frame.
    pub dropped: bool,
    /// The compressed picture, if any.
    pub sample: Option<CompressedSample>,
}

impl EncoderOutput {
    /// A successful completion.
    #[must_use]
    pub fn sample(sample: CompressedSample) -> Self {
        Self {
            status: STATUS_OK,
            dropped: false,
            sample: Some(sample),
        }
    }

    /// The encoder dropped the frame.
    #[must_use]
    pub fn dropped() -> Self {
        Self {
            status: STATUS_OK,
            dropped: true,
            sample: None,
        }
    }

    /// The encoder reported a failure status.
    #[must_use]
    pub fn failed(status: i32) -> Self {
        Self {
            status,
            dropped: false,
            sample: None,
        }
    }

    /// Returns true if the encoder reported success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }
}
