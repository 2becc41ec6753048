//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode a value.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the failure.
        message: String,
    },

    /// The input is not JSON.
    #[error("invalid JSON: {message}")]
    InvalidJson {
        /// Parser message.
        message: String,
    },

    /// NaN cannot be represented canonically.
    #[error("NaN values are forbidden")]
    NaNForbidden,

    /// Half and single precision floats are not canonical here.
    #[error("non-canonical float width")]
    NonCanonicalFloat,

    /// Indefinite-length items are forbidden.
    #[error("indefinite-length items are forbidden")]
    IndefiniteLengthForbidden,

    /// Invalid UTF-8 in a text string.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// Input ended in the middle of an item.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Bytes left over after the top-level item.
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),

    /// Structurally invalid or non-canonical CBOR.
    #[error("invalid CBOR structure: {message}")]
    InvalidStructure {
        /// Description of the problem.
        message: String,
    },

    /// A declared length exceeds what the decoder will allocate.
    #[error("declared size {claimed} exceeds limit {max_allowed}")]
    SizeLimitExceeded {
        /// Declared length.
        claimed: u64,
        /// Decoder limit.
        max_allowed: u64,
    },

    /// Nesting is deeper than the decoder allows.
    #[error("nesting depth exceeds {0}")]
    TooDeep(usize),
}

impl CodecError {
    /// Creates an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }
}
