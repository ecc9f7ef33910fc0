//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while converting, encoding or decoding record values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A typed record could not be converted to or from a [`crate::Value`].
    #[error("record conversion failed: {message}")]
    Conversion {
        /// Description of the conversion error.
        message: String,
    },

    /// Float values cannot be stored.
    #[error("float values cannot be stored in canonical CBOR")]
    FloatForbidden,

    /// Indefinite-length items are forbidden.
    #[error("indefinite-length items are forbidden")]
    IndefiniteLengthForbidden,

    /// Invalid UTF-8 string.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// Unexpected end of input.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Input continued after a complete value.
    #[error("{remaining} trailing bytes after value")]
    TrailingBytes {
        /// Number of unread bytes.
        remaining: usize,
    },

    /// Invalid CBOR structure.
    #[error("invalid CBOR structure: {message}")]
    InvalidStructure {
        /// Description of the structural error.
        message: String,
    },

    /// Unsupported CBOR type.
    #[error("unsupported CBOR type: {type_name}")]
    UnsupportedType {
        /// Name of the unsupported type.
        type_name: String,
    },

    /// A declared length exceeds the decoder limits.
    #[error("declared length {claimed} exceeds limit {max_allowed}")]
    SizeLimitExceeded {
        /// Length found in the input.
        claimed: u64,
        /// Largest length the decoder accepts.
        max_allowed: u64,
    },

    /// Integer does not fit in 64 signed bits.
    #[error("integer overflow")]
    IntegerOverflow,

    /// A value is not usable as a storage key.
    #[error("not a valid key: {reason}")]
    InvalidKey {
        /// Why the value was rejected.
        reason: String,
    },
}

impl CodecError {
    /// Create a conversion error.
    pub fn conversion(message: impl Into<String>) -> Self {
        Self::Conversion {
            message: message.into(),
        }
    }

    /// Create an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }

    /// Create an unsupported type error.
    pub fn unsupported_type(type_name: impl Into<String>) -> Self {
        Self::UnsupportedType {
            type_name: type_name.into(),
        }
    }

    /// Create an invalid key error.
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }
}
