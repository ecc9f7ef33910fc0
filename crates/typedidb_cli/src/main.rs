//! typedidb CLI
//!
//! Command-line tools for engine snapshots.
//!
//! # Commands
//!
//! - `inspect` - Display databases, stores and indexes in a snapshot
//! - `reconcile` - Apply a schema file to a database in a snapshot
//! - `delete` - Delete a database from a snapshot

mod commands;
mod error;
mod snapshot;

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use commands::reconcile::ReconcileOptions;
use commands::OutputFormat;
use error::CliResult;

/// typedidb command-line snapshot tools.
#[derive(Parser)]
#[command(name = "typedidb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the engine snapshot file
    #[arg(global = true, short, long)]
    snapshot: Option<PathBuf>,

    /// Output format
    #[arg(global = true, short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display databases, stores and indexes
    Inspect {
        /// Only show this database
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Open a database with a schema, upgrading it
    Reconcile {
        /// Schema JSON file
        #[arg(long)]
        schema: PathBuf,

        /// Database name
        #[arg(short, long)]
        name: String,

        /// Version to open at (default: stored version + 1)
        #[arg(long)]
        db_version: Option<u64>,

        /// Keep stores only if key path and auto-increment both match
        #[arg(long)]
        exact: bool,

        /// Report without writing the snapshot
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Delete a database
    Delete {
        /// Database name
        #[arg(short, long)]
        name: String,
    },

    /// Show version information
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "command failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> CliResult<()> {
    let mut out = io::stdout().lock();
    let snapshot = || {
        cli.snapshot
            .clone()
            .unwrap_or_else(|| PathBuf::from("typedidb.snapshot"))
    };

    match cli.command {
        Commands::Inspect { ref name } => {
            commands::inspect::run(&snapshot(), name.as_deref(), cli.format, &mut out)?;
        }
        Commands::Reconcile {
            ref schema,
            ref name,
            db_version,
            exact,
            dry_run,
        } => {
            let options = ReconcileOptions {
                name,
                version: db_version,
                exact,
                dry_run,
            };
            commands::reconcile::run(&snapshot(), schema, &options, cli.format, &mut out)?;
        }
        Commands::Delete { ref name } => {
            commands::delete::run(&snapshot(), name, &mut out)?;
        }
        Commands::Version => {
            writeln!(out, "typedidb CLI v{}", env!("CARGO_PKG_VERSION"))?;
            writeln!(out, "typedidb Core v{}", typedidb_core::VERSION)?;
        }
    }
    Ok(())
}
