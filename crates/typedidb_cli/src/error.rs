//! CLI error types.

use std::path::PathBuf;

use thiserror::Error;
use typedidb_core::CoreError;
use typedidb_storage::StorageError;

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// A file could not be read or written.
    #[error("{}: {source}", .path.display())]
    Io {
        /// The file involved.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The snapshot file does not exist.
    #[error("no snapshot found at {}", .0.display())]
    MissingSnapshot(PathBuf),

    /// The schema file is not valid JSON for a schema.
    #[error("invalid schema file {}: {source}", .path.display())]
    SchemaFile {
        /// The schema file.
        path: PathBuf,
        /// Parse error.
        source: serde_json::Error,
    },

    /// The database is not in the snapshot.
    #[error("database '{0}' not found in snapshot")]
    UnknownDatabase(String),

    /// The engine failed, or its snapshot is malformed.
    #[error(transparent)]
    Engine(#[from] StorageError),

    /// The typed layer refused the operation.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Output could not be rendered.
    #[error("failed to render output: {0}")]
    Render(#[from] serde_json::Error),

    /// Output could not be written.
    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}
