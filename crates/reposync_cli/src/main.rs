//! RepoSync CLI
//!
//! Maintenance tools for the identity store of a RepoSync session.
//!
//! # Commands
//!
//! - `inspect` - Display journal statistics and identity records
//! - `verify` - Check journal framing and record invariants without modifying anything
//! - `compact` - Rewrite the journal with only the live records
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use commands::{CliError, OutputFormat};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// RepoSync identity-store tools.
#[derive(Parser)]
#[command(name = "reposync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the identity journal
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
    /// Display journal statistics and identity records
    Inspect {
        /// List every identity record
        #[arg(short, long)]
        records: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Verify journal framing and record invariants
    Verify {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Rewrite the journal with only the live records
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { records, format } => {
            let path = cli.path.ok_or(CliError::MissingPath("inspect"))?;
            commands::inspect::run(&path, records, format)?;
        }
        Commands::Verify { format } => {
            let path = cli.path.ok_or(CliError::MissingPath("verify"))?;
            commands::verify::run(&path, format)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or(CliError::MissingPath("compact"))?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Version => {
            println!("RepoSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("RepoSync Engine v{}", reposync_engine::VERSION);
            println!("Journal format v{}", reposync_store::JOURNAL_VERSION);
        }
    }

    Ok(())
}
