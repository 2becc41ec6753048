//! Protocol error types.

use clinisync_codec::CodecError;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding protocol records.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Underlying CBOR error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A required field is absent.
    #[error("{record}: missing field '{field}'")]
    MissingField {
        /// Record being decoded.
        record: &'static str,
        /// Field name.
        field: &'static str,
    },

    /// A field is present but holds an unusable value.
    #[error("{record}: invalid field '{field}': {message}")]
    InvalidField {
        /// Record being decoded.
        record: &'static str,
        /// Field name.
        field: &'static str,
        /// What was wrong.
        message: String,
    },

    /// An enum name or code is not recognised.
    #[error("unknown {kind} '{value}'")]
    UnknownVariant {
        /// Enum being parsed.
        kind: &'static str,
        /// Offending input.
        value: String,
    },
}

impl ProtocolError {
    /// Creates an invalid field error.
    pub fn invalid_field(
        record: &'static str,
        field: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidField {
            record,
            field,
            message: message.into(),
        }
    }

    /// Creates an unknown variant error.
    pub fn unknown_variant(kind: &'static str, value: impl ToString) -> Self {
        Self::UnknownVariant {
            kind,
            value: value.to_string(),
        }
    }
}
