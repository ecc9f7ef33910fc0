//! Error types for typedidb core.

use thiserror::Error;
use typedidb_codec::CodecError;
use typedidb_storage::{KeyPathError, StorageError};

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Broad classification of a [`CoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Opening or deleting a database failed.
    Open,
    /// Bringing the physical schema in line with the declared one failed.
    Reconciliation,
    /// A single data request failed.
    Request,
    /// A transaction did not commit.
    Transaction,
    /// The API was used incorrectly.
    Usage,
    /// The declared schema is invalid.
    Schema,
    /// A record or key could not be converted.
    Data,
}

/// Errors that can occur in typedidb core operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Another connection would not close to let an upgrade run.
    #[error("opening '{name}' is blocked by open connections (version {old_version} -> {new_version})")]
    OpenBlocked {
        /// Database name.
        name: String,
        /// Version the open connections hold.
        old_version: u64,
        /// Version that was requested.
        new_version: u64,
    },

    /// The requested version is lower than the stored one.
    #[error("cannot open '{name}' at version {requested}: it is at version {current}")]
    VersionConflict {
        /// Database name.
        name: String,
        /// Version that was requested.
        requested: u64,
        /// Version that is stored.
        current: u64,
    },

    /// The engine refused the open.
    #[error("failed to open '{name}': {source}")]
    OpenFailed {
        /// Database name.
        name: String,
        /// Engine failure.
        #[source]
        source: StorageError,
    },

    /// A store or index could not be read, created or replaced during an
    /// upgrade.
    #[error("reconciling {} failed: {source}", describe_target(.store, .index))]
    ReconciliationFailed {
        /// Store being reconciled.
        store: String,
        /// Index being reconciled, if the failure was index-level.
        index: Option<String>,
        /// Engine failure.
        #[source]
        source: StorageError,
    },

    /// A data request failed.
    #[error("{operation} on '{store}' failed: {source}")]
    RequestFailed {
        /// Store the request ran against.
        store: String,
        /// Operation name (`add`, `get`, ...).
        operation: &'static str,
        /// Engine failure.
        #[source]
        source: StorageError,
    },

    /// The transaction was rolled back by an abort.
    #[error("transaction was aborted")]
    TransactionAborted,

    /// The transaction was rolled back because of an error.
    #[error("transaction failed: {source}")]
    TransactionFailed {
        /// The error that rolled it back.
        #[source]
        source: StorageError,
    },

    /// The engine refused to start a transaction.
    #[error("cannot start transaction: {source}")]
    TransactionOpenFailed {
        /// Engine failure.
        #[source]
        source: StorageError,
    },

    /// A request was issued after the transaction stopped accepting them.
    #[error("transaction on '{store}' is no longer active")]
    TransactionInactive {
        /// Store the request targeted.
        store: String,
    },

    /// A request was issued through a scope that has finished.
    #[error("scope over '{store}' has already finished")]
    ScopeFinished {
        /// Store the request targeted.
        store: String,
    },

    /// The store is not declared in the schema or not in the scope.
    #[error("unknown object store '{name}'")]
    UnknownStore {
        /// Store name.
        name: String,
    },

    /// The index is not declared on the store.
    #[error("unknown index '{index}' on '{store}'")]
    UnknownIndex {
        /// Store name.
        store: String,
        /// Index name.
        index: String,
    },

    /// A transaction was requested over no stores.
    #[error("a transaction needs at least one object store")]
    EmptyScope,

    /// Another connection would not close to let a delete run.
    #[error("deleting '{name}' is blocked by open connections")]
    DeleteBlocked {
        /// Database name.
        name: String,
    },

    /// The engine refused the delete.
    #[error("failed to delete '{name}': {source}")]
    DeleteFailed {
        /// Database name.
        name: String,
        /// Engine failure.
        #[source]
        source: StorageError,
    },

    /// The database handle has been closed.
    #[error("database '{name}' is closed")]
    DatabaseClosed {
        /// Database name.
        name: String,
    },

    /// A record does not hold a key at the store's key path.
    #[error("record for '{store}' has no key: {source}")]
    KeyNotFound {
        /// Store name.
        store: String,
        /// Where key resolution stopped.
        #[source]
        source: KeyPathError,
    },

    /// An explicit key was given where the store derives keys, or omitted
    /// where it needs one.
    #[error("invalid key usage on '{store}': {message}")]
    KeyUsage {
        /// Store name.
        store: String,
        /// What was wrong.
        message: String,
    },

    /// The declared schema is malformed.
    #[error("invalid schema: {message}")]
    InvalidSchema {
        /// What is wrong with it.
        message: String,
    },

    /// A record could not be converted to or from a stored value.
    #[error("record conversion failed: {0}")]
    Codec(#[from] CodecError),

    /// Any other engine failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The engine dropped a request without settling it.
    #[error("the engine dropped a pending request")]
    Abandoned,
}

fn describe_target(store: &str, index: &Option<String>) -> String {
    match index {
        Some(index) => format!("index '{index}' on '{store}'"),
        None => format!("object store '{store}'"),
    }
}

impl CoreError {
    /// Creates a reconciliation error.
    pub fn reconciliation(store: impl Into<String>, index: Option<&str>, source: StorageError) -> Self {
        Self::ReconciliationFailed {
            store: store.into(),
            index: index.map(str::to_string),
            source,
        }
    }

    /// Creates a request error.
    ///
    /// An inactive transaction is a usage error, not a request failure.
    pub fn request(store: impl Into<String>, operation: &'static str, source: StorageError) -> Self {
        match source {
            StorageError::TransactionInactive => Self::TransactionInactive {
                store: store.into(),
            },
            source => Self::RequestFailed {
                store: store.into(),
                operation,
                source,
            },
        }
    }

    /// Creates a key usage error.
    pub fn key_usage(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self::KeyUsage {
            store: store.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    /// The engine error underneath, if there is one.
    #[must_use]
    pub fn storage_source(&self) -> Option<&StorageError> {
        match self {
            Self::OpenFailed { source, .. }
            | Self::ReconciliationFailed { source, .. }
            | Self::RequestFailed { source, .. }
            | Self::TransactionFailed { source }
            | Self::TransactionOpenFailed { source }
            | Self::DeleteFailed { source, .. }
            | Self::Storage(source) => Some(source),
            _ => None,
        }
    }

    /// Classifies the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OpenBlocked { .. }
            | Self::VersionConflict { .. }
            | Self::OpenFailed { .. }
            | Self::DeleteBlocked { .. }
            | Self::DeleteFailed { .. } => ErrorKind::Open,
            Self::ReconciliationFailed { .. } => ErrorKind::Reconciliation,
            Self::RequestFailed { .. } | Self::Storage(_) | Self::Abandoned => ErrorKind::Request,
            Self::TransactionAborted
            | Self::TransactionFailed { .. }
            | Self::TransactionOpenFailed { .. } => ErrorKind::Transaction,
            Self::TransactionInactive { .. }
            | Self::ScopeFinished { .. }
            | Self::UnknownStore { .. }
            | Self::UnknownIndex { .. }
            | Self::EmptyScope
            | Self::DatabaseClosed { .. }
            | Self::KeyUsage { .. } => ErrorKind::Usage,
            Self::InvalidSchema { .. } => ErrorKind::Schema,
            Self::KeyNotFound { .. } | Self::Codec(_) => ErrorKind::Data,
        }
    }
}
