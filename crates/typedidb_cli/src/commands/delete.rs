//! Delete command implementation.

use std::io::Write;
use std::path::Path;
use std::rc::Rc;

use tracing::info;
use typedidb_core::{DatabaseFactory, Schema};

use crate::error::{CliError, CliResult};
use crate::snapshot;

/// Deletes `name` from the snapshot, returning the version it had.
pub fn run(snapshot_path: &Path, name: &str, out: &mut dyn Write) -> CliResult<u64> {
    let engine = snapshot::load(snapshot_path, false)?;
    if engine.describe(name).is_none() {
        return Err(CliError::UnknownDatabase(name.to_string()));
    }

    let factory = DatabaseFactory::new(Rc::new(engine.clone()), Schema::new())?;
    let old_version = engine.block_on(factory.delete_database(name))??;
    info!(database = name, old_version, "deleted database");
    writeln!(out, "Deleted database '{name}' (was version {old_version})")?;

    snapshot::save(&engine, snapshot_path)?;
    Ok(old_version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::seeded_snapshot;
    use tempfile::tempdir;

    #[test]
    fn deletes_and_saves() {
        let dir = tempdir().unwrap();
        let path = seeded_snapshot(dir.path());
        let mut out = Vec::new();
        assert_eq!(run(&path, "app", &mut out).unwrap(), 1);
        assert!(String::from_utf8(out).unwrap().contains("was version 1"));

        let engine = snapshot::load(&path, false).unwrap();
        assert!(engine.describe("app").is_none());
    }

    #[test]
    fn unknown_database_is_an_error() {
        let dir = tempdir().unwrap();
        let path = seeded_snapshot(dir.path());
        let mut out = Vec::new();
        let err = run(&path, "other", &mut out).unwrap_err();
        assert!(matches!(err, CliError::UnknownDatabase(_)));
    }
}
