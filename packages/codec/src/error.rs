//! Error types for encoder backends.

use thiserror::Error;

/// Errors reported by an encoder backend or a format-description query.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The backend could not create a compression session.
    #[error("failed to create compression session: status {status}")]
    SessionCreate { status: i32 },

    /// A session property was rejected by the backend.
    #[error("failed to set session property {property}: status {status}")]
    PropertyConfig { property: &'static str, status: i32 },

    /// A frame could not be submitted for compression.
    #[error("frame submission failed: status {status}")]
    Submit { status: i32 },

    /// Completing pending frames failed.
    #[error("flush failed: status {status}")]
    Flush { status: i32 },

    /// Querying the parameter set at `index` returned a non-success status.
    #[error("parameter set query at index {index} failed: status {status}")]
    ParameterSetQuery { index: usize, status: i32 },

    /// The backend does not support the requested codec.
    #[error("unsupported codec")]
    UnsupportedCodec,

    /// The codec does not support the requested profile.
    #[error("profile {profile} not supported for {codec}")]
    UnsupportedProfile {
        codec: &'static str,
        profile: &'static str,
    },

    /// The backend does not accept frames in this pixel format.
    #[error("unsupported pixel format")]
    UnsupportedPixelFormat,

    /// Invalid frame dimensions.
    #[error("invalid frame dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// Invalid parameter passed to the backend.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// Generic/unknown error.
    #[error("encoder error: {0}")]
    Generic(String),
}

impl CodecError {
    /// Create an InvalidParam error with a message.
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Self::InvalidParam(msg.into())
    }

    /// Create a Generic error with a message.
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Returns true for errors that come from configuring a session, as
    /// opposed to errors raised while frames are flowing.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::SessionCreate { .. }
                | Self::PropertyConfig { .. }
                | Self::UnsupportedCodec
                | Self::UnsupportedProfile { .. }
                | Self::InvalidDimensions { .. }
                | Self::InvalidParam(_)
        )
    }
}
