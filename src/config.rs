//! Recorder configuration.

use std::path::{Path, PathBuf};

use annexb_codec::{Codec, DataRateLimit, EncoderConfig, ProfileLevel};

/// Settings for one recording session.
///
/// Frame dimensions are not part of the configuration: the session takes
/// them from the first captured frame, and rate defaults scale with them
/// unless overridden here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderConfig {
    output_path: PathBuf,
    codec: Codec,
    profile_level: ProfileLevel,
    real_time: bool,
    max_keyframe_interval: u32,
    average_bitrate: Option<u64>,
    data_rate_limit: Option<DataRateLimit>,
}

impl RecorderConfig {
    /// Record to `output_path` with HEVC defaults.
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            codec: Codec::Hevc,
            profile_level: ProfileLevel::Main,
            real_time: true,
            max_keyframe_interval: 10,
            average_bitrate: None,
            data_rate_limit: None,
        }
    }

    /// Record `codec` to the default location in the temp directory.
    pub fn for_codec(codec: Codec) -> Self {
        Self::new(Self::default_output_path(codec)).codec(codec)
    }

    /// `temp.h265` / `temp.h264` in the system temp directory.
    pub fn default_output_path(codec: Codec) -> PathBuf {
        std::env::temp_dir().join(format!("temp.{}", codec.file_extension()))
    }

    /// Set the codec.
    pub fn codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Set the profile.
    pub fn profile_level(mut self, profile_level: ProfileLevel) -> Self {
        self.profile_level = profile_level;
        self
    }

    /// Enable or disable real-time encoding.
    pub fn real_time(mut self, real_time: bool) -> Self {
        self.real_time = real_time;
        self
    }

    /// Set the maximum keyframe interval in frames.
    pub fn max_keyframe_interval(mut self, frames: u32) -> Self {
        self.max_keyframe_interval = frames;
        self
    }

    /// Use a fixed average bitrate instead of the area-based default.
    pub fn average_bitrate(mut self, bits_per_second: u64) -> Self {
        self.average_bitrate = Some(bits_per_second);
        self
    }

    /// Use a fixed data-rate cap instead of the area-based default.
    pub fn data_rate_limit(mut self, bytes: u64, seconds: u32) -> Self {
        self.data_rate_limit = Some(DataRateLimit::new(bytes, seconds));
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn selected_codec(&self) -> Codec {
        self.codec
    }

    /// Encoder settings for a session of the given size.
    pub fn encoder_config(&self, width: u32, height: u32) -> EncoderConfig {
        let mut config = EncoderConfig::new(width, height, self.codec)
            .profile_level(self.profile_level)
            .real_time(self.real_time)
            .max_keyframe_interval(self.max_keyframe_interval);
        if let Some(bitrate) = self.average_bitrate {
            config = config.average_bitrate(bitrate);
        }
        if let Some(limit) = self.data_rate_limit {
            config = config.data_rate_limit(limit);
        }
        config
    }
}
