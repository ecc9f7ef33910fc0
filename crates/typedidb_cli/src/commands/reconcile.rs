//! Reconcile command implementation.
//!
//! Opens a database in a snapshot with a declared schema, so an upgrade
//! creates or recreates whatever the schema asks for, and reports what
//! was done.

use std::io::Write;
use std::path::Path;
use std::rc::Rc;

use tracing::info;
use typedidb_core::{Config, DatabaseFactory, ReconcileReport, Schema, SchemaAction, StoreCompatibility};

use super::OutputFormat;
use crate::error::{CliError, CliResult};
use crate::snapshot;

/// Options for [`run`].
#[derive(Debug, Clone)]
pub struct ReconcileOptions<'a> {
    /// Database to open.
    pub name: &'a str,
    /// Version to open at. `None` bumps the stored version by one.
    pub version: Option<u64>,
    /// Keep stores only when both key path and auto-increment match.
    pub exact: bool,
    /// Report without writing the snapshot back.
    pub dry_run: bool,
}

/// Reads a schema from a JSON file.
pub fn load_schema(path: &Path) -> CliResult<Schema> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| CliError::SchemaFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Runs the reconcile command.
pub fn run(
    snapshot_path: &Path,
    schema_path: &Path,
    options: &ReconcileOptions<'_>,
    format: OutputFormat,
    out: &mut dyn Write,
) -> CliResult<ReconcileReport> {
    let schema = load_schema(schema_path)?;
    let engine = snapshot::load(snapshot_path, true)?;

    let rule = if options.exact {
        StoreCompatibility::Exact
    } else {
        StoreCompatibility::KeyPathOrAutoIncrement
    };
    let config = Config::new()
        .store_compatibility(rule)
        .close_on_version_change(false);
    let factory = DatabaseFactory::new(Rc::new(engine.clone()), schema)?.with_config(config);

    let current = engine
        .describe(options.name)
        .map_or(0, |description| description.version);
    let version = options.version.unwrap_or(current + 1);
    info!(database = options.name, from = current, to = version, "reconciling");

    let db = engine.block_on(factory.open(options.name, Some(version)))??;
    let report = db.reconcile_report().cloned().unwrap_or(ReconcileReport {
        old_version: current,
        new_version: db.version(),
        actions: Vec::new(),
    });
    db.close();

    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &report)?;
            writeln!(out)?;
        }
        OutputFormat::Text => print_text(options.name, &report, out)?,
    }

    if options.dry_run {
        writeln!(out, "dry run: snapshot not written")?;
    } else {
        snapshot::save(&engine, snapshot_path)?;
    }
    Ok(report)
}

fn print_text(name: &str, report: &ReconcileReport, out: &mut dyn Write) -> CliResult<()> {
    writeln!(
        out,
        "Database '{}': version {} -> {}",
        name, report.old_version, report.new_version
    )?;
    if report.actions.is_empty() {
        writeln!(out, "  no upgrade ran")?;
    }
    for action in &report.actions {
        let line = match action {
            SchemaAction::CreateStore { store } => format!("create store {store}"),
            SchemaAction::KeepStore { store } => format!("keep store {store}"),
            SchemaAction::RecreateStore { store, .. } => {
                format!("recreate store {store} (records dropped)")
            }
            SchemaAction::CreateIndex { store, index } => format!("create index {store}.{index}"),
            SchemaAction::KeepIndex { store, index } => format!("keep index {store}.{index}"),
            SchemaAction::RecreateIndex { store, index, .. } => {
                format!("recreate index {store}.{index}")
            }
        };
        writeln!(out, "  {line}")?;
    }
    Ok(())
}
