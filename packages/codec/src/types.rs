//! Core types for configuring a compression session.

use crate::CodecError;

/// Video codec produced by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    /// H.264/AVC codec.
    H264,
    /// H.265/HEVC codec.
    Hevc,
}

impl Default for Codec {
    fn default() -> Self {
        Self::Hevc
    }
}

impl Codec {
    /// Number of out-of-band parameter sets carried by a keyframe's format
    /// description (SPS+PPS for AVC, VPS+SPS+PPS for HEVC).
    #[must_use]
    pub fn parameter_set_count(&self) -> usize {
        match self {
            Self::H264 => 2,
            Self::Hevc => 3,
        }
    }

    /// Short display name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::H264 => "H.264",
            Self::Hevc => "HEVC",
        }
    }

    /// File extension conventionally used for the raw elementary stream.
    #[must_use]
    pub fn file_extension(&self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::Hevc => "h265",
        }
    }

    /// Four-character code identifying the codec to the encoder
    /// (`avc1` / `hvc1`).
    #[must_use]
    pub fn fourcc(&self) -> u32 {
        match self {
            Self::H264 => u32::from_be_bytes(*b"avc1"),
            Self::Hevc => u32::from_be_bytes(*b"hvc1"),
        }
    }
}

impl std::str::FromStr for Codec {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h264" | "avc" | "h.264" => Ok(Self::H264),
            "h265" | "hevc" | "h.265" => Ok(Self::Hevc),
            other => Err(CodecError::invalid_param(format!("unknown codec '{}'", other))),
        }
    }
}

/// Encoder profile with automatic level selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileLevel {
    /// Main profile (AVC and HEVC).
    Main,
    /// High profile (AVC only).
    High,
    /// Baseline profile (AVC only).
    Baseline,
}

impl Default for ProfileLevel {
    fn default() -> Self {
        Self::Main
    }
}

impl ProfileLevel {
    /// Short display name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Main => "Main",
            Self::High => "High",
            Self::Baseline => "Baseline",
        }
    }

    /// Returns true if `codec` defines this profile.
    #[must_use]
    pub fn supported_by(&self, codec: Codec) -> bool {
        match codec {
            Codec::H264 => true,
            Codec::Hevc => matches!(self, Self::Main),
        }
    }
}

/// Hard cap on the data rate: at most `bytes` within any `seconds` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRateLimit {
    pub bytes: u64,
    pub seconds: u32,
}

impl DataRateLimit {
    #[must_use]
    pub fn new(bytes: u64, seconds: u32) -> Self {
        Self { bytes, seconds }
    }
}

/// Configuration for creating a compression session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderConfig {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Video codec to use.
    pub codec: Codec,
    /// Profile (level is chosen automatically).
    pub profile_level: ProfileLevel,
    /// Ask the encoder to keep up with real-time capture.
    pub real_time: bool,
    /// Maximum distance between keyframes, in frames.
    pub max_keyframe_interval: u32,
    /// Target average bitrate in bits per second.
    pub average_bitrate: u64,
    /// Hard data-rate cap.
    pub data_rate_limit: DataRateLimit,
}

impl EncoderConfig {
    /// Create a configuration for the given dimensions.
    ///
    /// Bitrate defaults scale with the frame area: `w*h*2*32` bits/s on
    /// average, capped at `w*h*2*4` bytes per second.
    #[must_use]
    pub fn new(width: u32, height: u32, codec: Codec) -> Self {
        let area = width as u64 * height as u64;
        Self {
            width,
            height,
            codec,
            profile_level: ProfileLevel::Main,
            real_time: true,
            max_keyframe_interval: 10,
            average_bitrate: area * 2 * 32,
            data_rate_limit: DataRateLimit::new(area * 2 * 4, 1),
        }
    }

    /// Set the profile.
    #[must_use]
    pub fn profile_level(mut self, profile_level: ProfileLevel) -> Self {
        self.profile_level = profile_level;
        self
    }

    /// Enable or disable real-time mode.
    #[must_use]
    pub fn real_time(mut self, real_time: bool) -> Self {
        self.real_time = real_time;
        self
    }

    /// Set the maximum keyframe interval in frames.
    #[must_use]
    pub fn max_keyframe_interval(mut self, frames: u32) -> Self {
        self.max_keyframe_interval = frames;
        self
    }

    /// Set the average bitrate in bits per second.
    #[must_use]
    pub fn average_bitrate(mut self, bitrate: u64) -> Self {
        self.average_bitrate = bitrate;
        self
    }

    /// Set the hard data-rate cap.
    #[must_use]
    pub fn data_rate_limit(mut self, limit: DataRateLimit) -> Self {
        self.data_rate_limit = limit;
        self
    }

    /// Check the configuration before handing it to a backend.
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.width == 0 || self.height == 0 {
            return Err(CodecError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        if !self.profile_level.supported_by(self.codec) {
            return Err(CodecError::UnsupportedProfile {
                codec: self.codec.name(),
                profile: self.profile_level.name(),
            });
        }
        if self.max_keyframe_interval == 0 {
            return Err(CodecError::invalid_param(
                "max keyframe interval must be at least 1",
            ));
        }
        if self.data_rate_limit.seconds == 0 {
            return Err(CodecError::invalid_param(
                "data rate limit window must be at least 1 second",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_set_count() {
        assert_eq!(Codec::H264.parameter_set_count(), 2);
        assert_eq!(Codec::Hevc.parameter_set_count(), 3);
    }

    #[test]
    fn test_codec_from_str() {
        assert_eq!("hevc".parse::<Codec>().unwrap(), Codec::Hevc);
        assert_eq!("H264".parse::<Codec>().unwrap(), Codec::H264);
        assert!("vp9".parse::<Codec>().is_err());
    }

    #[test]
    fn test_fourcc() {
        assert_eq!(Codec::H264.fourcc(), 0x6176_6331);
        assert_eq!(Codec::Hevc.fourcc(), 0x6876_6331);
    }

    #[test]
    fn test_default_rates_follow_frame_area() {
        let config = EncoderConfig::new(1920, 1080, Codec::Hevc);
        assert_eq!(config.average_bitrate, 1920 * 1080 * 2 * 32);
        assert_eq!(config.data_rate_limit, DataRateLimit::new(1920 * 1080 * 2 * 4, 1));
        assert_eq!(config.max_keyframe_interval, 10);
        assert!(config.real_time);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_config() {
        let zero = EncoderConfig::new(0, 720, Codec::H264);
        assert!(matches!(
            zero.validate(),
            Err(CodecError::InvalidDimensions { width: 0, height: 720 })
        ));

        let hevc_high = EncoderConfig::new(1280, 720, Codec::Hevc).profile_level(ProfileLevel::High);
        assert!(matches!(
            hevc_high.validate(),
            Err(CodecError::UnsupportedProfile { .. })
        ));

        let avc_high = EncoderConfig::new(1280, 720, Codec::H264).profile_level(ProfileLevel::High);
        assert!(avc_high.validate().is_ok());

        let no_gop = EncoderConfig::new(1280, 720, Codec::H264).max_keyframe_interval(0);
        assert!(no_gop.validate().is_err());

        let no_window = EncoderConfig::new(1280, 720, Codec::H264)
            .data_rate_limit(DataRateLimit::new(1000, 0));
        assert!(no_window.validate().is_err());
    }
}
