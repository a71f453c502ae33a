//! Error types

use thiserror::Error;

use crate::protocol::AudioFormat;

/// PCM layout errors raised by the format normalizer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("buffer of {len} bytes is not a multiple of the {block_align}-byte frame size")]
    InvalidFrameAlignment { len: usize, block_align: usize },

    #[error("invalid audio format: {0}")]
    InvalidFormat(AudioFormat),

    #[error("unsupported conversion from {from} to {to}")]
    UnsupportedConversion { from: AudioFormat, to: AudioFormat },
}

/// Outcome of a failed write to a viewer connection
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("viewer connection closed")]
    Closed,

    #[error("viewer queue full")]
    Full,
}

/// Rejected ingestion request
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("failed to parse audio message: {0}")]
    Decode(String),

    #[error("invalid audio format: {0}")]
    InvalidFormat(AudioFormat),
}

/// Capture source errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("no input device available")]
    NoDevice,

    #[error("unsupported sample format: {0}")]
    UnsupportedSampleFormat(String),

    #[error("capture stream error: {0}")]
    Stream(String),
}

/// Upload errors on the agent side
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("relay returned status {0}")]
    Status(u16),

    #[error("failed to encode audio message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Crate-level error
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Upload(#[from] UploadError),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_message() {
        let err = FormatError::InvalidFrameAlignment { len: 7, block_align: 4 };
        assert_eq!(
            err.to_string(),
            "buffer of 7 bytes is not a multiple of the 4-byte frame size"
        );
    }

    #[test]
    fn test_format_error_converts() {
        let err: Error = FormatError::InvalidFormat(AudioFormat::new(0, 1, 16)).into();
        assert!(matches!(err, Error::Format(_)));
        assert!(err.to_string().contains("0Hz"));
    }
}
