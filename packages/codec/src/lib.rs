//! Encoder contracts and sample types for annexb-recorder.
//!
//! This crate holds everything an encoder backend needs to plug into the
//! recorder without depending on it:
//!
//! - [`EncoderConfig`] and friends describe how a compression session is set up
//! - [`VideoEncoder`] / [`EncoderFactory`] are the session contract
//! - [`CompressionOutputHandler`] receives [`EncoderOutput`] events
//! - [`FormatDescription`] gives read access to a keyframe's parameter sets
//!
//! # Example
//!
//! ```ignore
//! use annexb_codec::{Codec, EncoderConfig, ProfileLevel};
//!
//! let config = EncoderConfig::new(1920, 1080, Codec::Hevc)
//!     .profile_level(ProfileLevel::Main)
//!     .max_keyframe_interval(10);
//! config.validate()?;
//! let encoder = factory.create(&config, handler)?;
//! ```

mod error;
mod format;
mod frame;
mod traits;
mod types;

pub use error::CodecError;
pub use format::{StaticFormatDescription, STATUS_OUT_OF_RANGE};
pub use frame::{
    expected_frame_size, CompressedSample, EncoderOutput, PixelFormat, RawFrame, STATUS_OK,
};
pub use traits::{
    CompressionOutputHandler, EncoderFactory, FormatDescription, ParameterSetRef, VideoEncoder,
};
pub use types::{Codec, DataRateLimit, EncoderConfig, ProfileLevel};
