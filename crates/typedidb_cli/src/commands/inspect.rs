//! Inspect command implementation.

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use typedidb_storage::{DatabaseDescription, InMemoryEngine};

use super::OutputFormat;
use crate::error::{CliError, CliResult};
use crate::snapshot;

/// Snapshot inspection result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectResult {
    /// Snapshot path.
    pub path: String,
    /// Snapshot size in bytes.
    pub size: u64,
    /// Committed databases, sorted by name.
    pub databases: Vec<DatabaseDescription>,
}

/// Runs the inspect command.
///
/// With `database`, only that database is shown.
pub fn run(
    path: &Path,
    database: Option<&str>,
    format: OutputFormat,
    out: &mut dyn Write,
) -> CliResult<()> {
    let engine = snapshot::load(path, false)?;
    let size = std::fs::metadata(path)
        .map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .len();
    let result = InspectResult {
        path: path.display().to_string(),
        size,
        databases: describe(&engine, database)?,
    };

    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &result)?;
            writeln!(out)?;
        }
        OutputFormat::Text => print_text(&result, out)?,
    }
    Ok(())
}

fn describe(engine: &InMemoryEngine, only: Option<&str>) -> CliResult<Vec<DatabaseDescription>> {
    if let Some(name) = only {
        return engine
            .describe(name)
            .map(|description| vec![description])
            .ok_or_else(|| CliError::UnknownDatabase(name.to_string()));
    }
    let mut names = engine.database_names();
    names.sort();
    Ok(names.iter().filter_map(|name| engine.describe(name)).collect())
}

fn print_text(result: &InspectResult, out: &mut dyn Write) -> CliResult<()> {
    writeln!(out, "Snapshot: {} ({} bytes)", result.path, result.size)?;
    if result.databases.is_empty() {
        writeln!(out, "  (no databases)")?;
        return Ok(());
    }
    for db in &result.databases {
        writeln!(out)?;
        writeln!(out, "Database '{}' (version {})", db.name, db.version)?;
        for store in &db.stores {
            let key_path = store
                .key_path
                .as_ref()
                .map_or_else(|| "out-of-line".to_string(), |path| format!("keyPath {path}"));
            let auto = if store.auto_increment {
                ", autoIncrement"
            } else {
                ""
            };
            writeln!(
                out,
                "  {} [{}{}]: {} records",
                store.name, key_path, auto, store.record_count
            )?;
            for index in &store.indexes {
                let mut flags = Vec::new();
                if index.unique {
                    flags.push("unique");
                }
                if index.multi_entry {
                    flags.push("multiEntry");
                }
                let flags = if flags.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", flags.join(", "))
                };
                writeln!(out, "    index {} on {}{}", index.name, index.key_path, flags)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::seeded_snapshot;
    use tempfile::tempdir;

    #[test]
    fn text_lists_stores_and_indexes() {
        let dir = tempdir().unwrap();
        let path = seeded_snapshot(dir.path());
        let mut out = Vec::new();
        run(&path, None, OutputFormat::Text, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Database 'app' (version 1)"));
        assert!(text.contains("people [keyPath id]: 2 records"));
        assert!(text.contains("index by_name on name (unique)"));
    }

    #[test]
    fn json_is_machine_readable() {
        let dir = tempdir().unwrap();
        let path = seeded_snapshot(dir.path());
        let mut out = Vec::new();
        run(&path, Some("app"), OutputFormat::Json, &mut out).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(json["databases"][0]["name"], "app");
        assert_eq!(json["databases"][0]["stores"][0]["recordCount"], 2);
    }

    #[test]
    fn unknown_database_is_reported() {
        let dir = tempdir().unwrap();
        let path = seeded_snapshot(dir.path());
        let mut out = Vec::new();
        let err = run(&path, Some("nope"), OutputFormat::Text, &mut out).unwrap_err();
        assert!(matches!(err, CliError::UnknownDatabase(name) if name == "nope"));
    }
}
