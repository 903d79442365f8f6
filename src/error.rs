//! Error types for parameter-set extraction and recording sessions.

use std::path::PathBuf;

use annexb_codec::CodecError;
use thiserror::Error;

use crate::nal::ParameterSetKind;

/// A keyframe's parameter sets could not be read.
///
/// Extraction is all-or-nothing: no partial bundle is produced.
#[derive(Debug, Error)]
#[error("failed to extract {} (index {index})", .kind.name())]
pub struct ExtractionError {
    pub kind: ParameterSetKind,
    pub index: usize,
    #[source]
    pub source: CodecError,
}

/// Failures that end a recording session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The encoder session could not be created or configured.
    #[error("encoder configuration failed: {0}")]
    Configuration(#[source] CodecError),

    /// The output sink could not be created.
    #[error("cannot create output sink {}: {source}", .path.display())]
    SinkOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing to the output sink failed mid-recording.
    #[error("output sink write failed: {0}")]
    SinkWrite(#[source] std::io::Error),

    /// The writer thread could not be started.
    #[error("cannot start writer thread: {0}")]
    WriterSpawn(#[source] std::io::Error),

    /// The writer thread died without reporting a result.
    #[error("writer thread panicked")]
    WriterPanicked,

    /// The session was already stopped.
    #[error("session terminated")]
    Terminated,
}

impl SessionError {
    /// Returns true for sink failures (open or write).
    #[must_use]
    pub fn is_sink(&self) -> bool {
        matches!(self, Self::SinkOpen { .. } | Self::SinkWrite(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_error_message() {
        let err = ExtractionError {
            kind: ParameterSetKind::Pps,
            index: 2,
            source: CodecError::ParameterSetQuery { index: 2, status: -12712 },
        };
        assert_eq!(err.to_string(), "failed to extract PPS (index 2)");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_sink_classification() {
        let open = SessionError::SinkOpen {
            path: PathBuf::from("/nonexistent/out.h265"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(open.is_sink());
        assert!(open.to_string().contains("/nonexistent/out.h265"));
        assert!(!SessionError::Configuration(CodecError::UnsupportedCodec).is_sink());
    }
}
