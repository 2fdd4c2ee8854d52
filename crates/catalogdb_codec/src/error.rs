//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while encoding or decoding CBOR.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Serialization failed.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the failure.
        message: String,
    },

    /// The input is not valid CBOR or does not match the target type.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the failure.
        message: String,
    },

    /// A document was followed by unexpected bytes.
    #[error("{remaining} trailing bytes after CBOR document")]
    TrailingBytes {
        /// Number of unread bytes.
        remaining: usize,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }
}
