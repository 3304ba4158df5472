//! Batchsync CLI
//!
//! Command-line tools for batch directories written by batchsync.
//!
//! # Commands
//!
//! - `inspect` - Display the manifest and per-part statistics
//! - `verify` - Check the manifest layout and every part file
//! - `dump` - Print the rows held by the parts
//! - `snapshot-name` - Print the snapshot directory for a parameter set
//! - `clean` - Remove a batch directory

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Batchsync batch directory tools.
#[derive(Parser)]
#[command(name = "batchsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the batch directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display the manifest and per-part statistics
    Inspect {
        /// Decode every part to count its rows
        #[arg(short, long)]
        rows: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check the manifest layout and every part file
    Verify,

    /// Print the rows held by the parts
    Dump {
        /// Only dump the part with this index
        #[arg(long)]
        part: Option<u32>,

        /// Only dump rows of this table
        #[arg(short, long)]
        table: Option<String>,

        /// Maximum number of rows to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the snapshot directory for a parameter set
    SnapshotName {
        /// Parameters as name=value pairs
        parameters: Vec<String>,
    },

    /// Remove a batch directory
    Clean {
        /// Dry run - show what would be removed
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { rows, format } => {
            let path = cli.path.ok_or("Batch directory required for inspect")?;
            commands::inspect::run(&path, rows, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Batch directory required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Dump {
            part,
            table,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("Batch directory required for dump")?;
            commands::dump::run(&path, part, table.as_deref(), limit, &format)?;
        }
        Commands::SnapshotName { parameters } => {
            let root = cli.path.as_deref();
            commands::snapshot_name::run(&parameters, root)?;
        }
        Commands::Clean { dry_run } => {
            let path = cli.path.ok_or("Batch directory required for clean")?;
            commands::clean::run(&path, dry_run)?;
        }
        Commands::Version => {
            println!("Batchsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
