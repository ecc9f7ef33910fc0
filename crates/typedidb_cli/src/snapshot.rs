//! Loading and saving engine snapshot files.

use std::fs;
use std::path::Path;

use tracing::debug;
use typedidb_storage::InMemoryEngine;

use crate::error::{CliError, CliResult};

/// Loads the engine held in `path`.
///
/// With `create_missing`, a missing file yields an empty engine.
pub fn load(path: &Path, create_missing: bool) -> CliResult<InMemoryEngine> {
    if !path.exists() {
        if create_missing {
            debug!(path = %path.display(), "starting from an empty engine");
            return Ok(InMemoryEngine::new());
        }
        return Err(CliError::MissingSnapshot(path.to_path_buf()));
    }
    let bytes = fs::read(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), bytes = bytes.len(), "loading snapshot");
    Ok(InMemoryEngine::from_snapshot(&bytes)?)
}

/// Writes the committed state of `engine` to `path`.
pub fn save(engine: &InMemoryEngine, path: &Path) -> CliResult<()> {
    engine.run_until_idle();
    let bytes = engine.snapshot();
    debug!(path = %path.display(), bytes = bytes.len(), "writing snapshot");
    fs::write(path, bytes).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_an_error_unless_created() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.cbor");
        assert!(matches!(load(&path, false), Err(CliError::MissingSnapshot(_))));
        let engine = load(&path, true).unwrap();
        assert!(engine.database_names().is_empty());
    }

    #[test]
    fn garbage_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.cbor");
        fs::write(&path, b"not a snapshot").unwrap();
        assert!(matches!(load(&path, false), Err(CliError::Engine(_))));
    }

    #[test]
    fn empty_engine_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.cbor");
        save(&InMemoryEngine::new(), &path).unwrap();
        let loaded = load(&path, false).unwrap();
        assert!(loaded.database_names().is_empty());
    }
}
