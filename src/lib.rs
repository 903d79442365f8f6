//! Record hardware-encoded H.264/HEVC to raw Annex B elementary streams.
//!
//! Encoders deliver pictures in length-prefixed (AVCC) form, with the
//! VPS/SPS/PPS parameter sets kept out of band in a format description.
//! This crate reframes that output into a start-code-delimited stream that
//! any conformant parser can decode, re-emitting the parameter sets in front
//! of every keyframe.
//!
//! # Quick Start
//!
//! ```ignore
//! use annexb_recorder::{Controller, RecorderConfig};
//! use annexb_codec::{Codec, PixelFormat, RawFrame};
//!
//! let config = RecorderConfig::new("capture.h265").codec(Codec::Hevc);
//! let controller = Controller::start(config, factory)?;
//!
//! // From the capture thread, one frame at a time:
//! let frame = RawFrame::new(1280, 720, PixelFormat::Bgra, &pixels, timestamp_us);
//! controller.submit_frame(&frame)?;
//!
//! // Later, from anywhere:
//! let summary = controller.stop()?;
//! println!("wrote {} bytes", summary.pipeline.bytes_written);
//! ```
//!
//! # Feature Flags
//!
//! - `vtenc` - macOS VideoToolbox encoder backend ([`VtEncoderFactory`])

pub mod config;
pub mod error;
pub mod nal;
pub mod param_sets;
pub mod pipeline;
pub mod session;
pub mod writer;

#[cfg(all(target_os = "macos", feature = "vtenc"))]
pub mod vtenc;

pub use config::RecorderConfig;
pub use error::{ExtractionError, SessionError};
pub use nal::{reframe, split_annex_b, NalKind, NalUnit, ParameterSetKind, Reframer, START_CODE};
pub use param_sets::{extract, ParameterSetBundle};
pub use pipeline::{ChannelHandler, PipelineStats, SamplePipeline, WriterThread};
pub use session::{Controller, SessionState, SessionStats, SessionSummary};
pub use writer::{create_sink, AnnexBWriter, WriterStats};

#[cfg(all(target_os = "macos", feature = "vtenc"))]
pub use vtenc::{VtEncoder, VtEncoderFactory};

pub use annexb_codec as codec;
