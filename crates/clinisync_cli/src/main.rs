//! Clinisync CLI
//!
//! Command-line tools for inspecting and maintaining a sync store directory
//! while no engine has it open.
//!
//! # Commands
//!
//! - `inspect` - Display queue statistics and journal sizes
//! - `pending` - List the pending queue in transmission order
//! - `conflicts` - List open conflicts
//! - `verify` - Replay journals and check every checksum
//! - `compact` - Rewrite journals with live records only

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Clinisync command-line store tools.
#[derive(Parser)]
#[command(name = "clinisync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
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
    /// Display queue statistics and journal sizes
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List pending entities in transmission order
    Pending {
        /// Only this entity type (repeatable)
        #[arg(short = 't', long = "type")]
        types: Vec<String>,

        /// Only entities at this priority or more urgent
        #[arg(short, long)]
        max_priority: Option<u32>,

        /// Maximum number of entities to list
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// List open conflicts
    Conflicts {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify journal and checksum integrity
    Verify,

    /// Rewrite journals with live records only
    Compact {
        /// Dry run - show what would be reclaimed
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
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Pending {
            types,
            max_priority,
            limit,
        } => {
            let path = cli.path.ok_or("Store path required for pending")?;
            commands::pending::run(&path, types, max_priority, limit)?;
        }
        Commands::Conflicts { format } => {
            let path = cli.path.ok_or("Store path required for conflicts")?;
            commands::conflicts::run(&path, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Version => {
            println!("Clinisync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Clinisync Engine v{}", clinisync_engine::VERSION);
        }
    }

    Ok(())
}
