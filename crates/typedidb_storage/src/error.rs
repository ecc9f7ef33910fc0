//! Error types for storage operations.
//!
//! Variants mirror the conditions an IndexedDB-style engine reports, so a
//! caller can tell "not found" apart from every other failure during schema
//! introspection.

use thiserror::Error;
use typedidb_codec::CodecError;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors reported by a storage engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The named object store, index or database does not exist.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// What was looked up ("object store", "index", ...).
        kind: &'static str,
        /// The name that was looked up.
        name: String,
    },

    /// A uniqueness or existence constraint was violated.
    #[error("constraint violated: {message}")]
    Constraint {
        /// Description of the violation.
        message: String,
    },

    /// A request was issued against a transaction that is not active.
    #[error("transaction is not active")]
    TransactionInactive,

    /// A write was issued in a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnly,

    /// The operation is not allowed in the object's current state.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the state problem.
        message: String,
    },

    /// The arguments are not acceptable for this object.
    #[error("invalid access: {message}")]
    InvalidAccess {
        /// Description of the problem.
        message: String,
    },

    /// A key or key path problem.
    #[error("data error: {message}")]
    Data {
        /// Description of the problem.
        message: String,
    },

    /// A record could not be cloned into storage.
    #[error("record cannot be stored: {0}")]
    DataClone(#[from] CodecError),

    /// The transaction was aborted before this request ran.
    #[error("transaction aborted")]
    Aborted,

    /// The requested version is lower than the stored one.
    #[error("requested version {requested} is lower than existing version {current}")]
    Version {
        /// Version asked for.
        requested: u64,
        /// Version on disk.
        current: u64,
    },

    /// Any other engine failure.
    #[error("engine failure: {message}")]
    Unknown {
        /// Description of the failure.
        message: String,
    },

    /// The event loop ran out of work while a caller was still waiting.
    #[error("event loop stalled with nothing left to run")]
    Stalled,
}

impl StorageError {
    /// Creates a not found error.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Creates a constraint error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an invalid access error.
    pub fn invalid_access(message: impl Into<String>) -> Self {
        Self::InvalidAccess {
            message: message.into(),
        }
    }

    /// Creates a data error.
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data {
            message: message.into(),
        }
    }

    /// Creates an unknown error.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
        }
    }

    /// Whether this is the "not found" condition.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// The DOM exception name this condition corresponds to.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NotFoundError",
            Self::Constraint { .. } => "ConstraintError",
            Self::TransactionInactive => "TransactionInactiveError",
            Self::ReadOnly => "ReadOnlyError",
            Self::InvalidState { .. } => "InvalidStateError",
            Self::InvalidAccess { .. } => "InvalidAccessError",
            Self::Data { .. } => "DataError",
            Self::DataClone(_) => "DataCloneError",
            Self::Aborted => "AbortError",
            Self::Version { .. } => "VersionError",
            Self::Unknown { .. } => "UnknownError",
            Self::Stalled => "StalledError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_distinguishable() {
        let missing = StorageError::not_found("object store", "users");
        assert!(missing.is_not_found());
        assert_eq!(missing.name(), "NotFoundError");
        assert_eq!(missing.to_string(), "object store 'users' not found");

        assert!(!StorageError::unknown("disk on fire").is_not_found());
        assert!(!StorageError::Aborted.is_not_found());
    }

    #[test]
    fn codec_errors_become_data_clone() {
        let err: StorageError = CodecError::FloatForbidden.into();
        assert_eq!(err.name(), "DataCloneError");
    }
}
