//! OdontoSync CLI
//!
//! Command-line runner for the ERP to insurer synchronization.
//!
//! # Commands
//!
//! - `run` - Run every phase of one or both entity kinds
//! - `phase` - Run a single phase
//! - `ledger` - List control ledger rows
//! - `compact` - Compact ledger logs

mod client;
mod commands;
mod config;
mod source;

use clap::{Parser, Subcommand};
use config::FileConfig;
use odontosync_protocol::{ControlStatus, ControlType, EntityKind};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// ERP to insurer synchronization tools.
#[derive(Parser)]
#[command(name = "odontosync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(global = true, short, long, default_value = "odontosync.json")]
    config: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every phase in the configured order
    Run {
        /// Only this entity kind (company, beneficiary)
        #[arg(short, long)]
        entity: Option<EntityKind>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run a single phase
    Phase {
        /// Entity kind (company, beneficiary)
        entity: EntityKind,

        /// Phase (addition, alteration, exclusion)
        kind: ControlType,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List control ledger rows
    Ledger {
        /// Only this entity kind
        #[arg(short, long)]
        entity: Option<EntityKind>,

        /// Only rows in this status (pending, processing, success, error)
        #[arg(short, long)]
        status: Option<ControlStatus>,

        /// Only rows for this entity key
        #[arg(short, long)]
        key: Option<String>,

        /// Show payloads and responses
        #[arg(short, long)]
        payload: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Rewrite ledger logs with one line per row
    Compact {
        /// Only this entity kind
        #[arg(short, long)]
        entity: Option<EntityKind>,

        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run { entity, format } => {
            let config = FileConfig::load(&cli.config)?;
            commands::run::run(config, entity, &format)?;
        }
        Commands::Phase {
            entity,
            kind,
            format,
        } => {
            let config = FileConfig::load(&cli.config)?;
            commands::phase::run(config, entity, kind, &format)?;
        }
        Commands::Ledger {
            entity,
            status,
            key,
            payload,
            format,
        } => {
            let config = FileConfig::load(&cli.config)?;
            commands::ledger::run(&config, entity, status, key.as_deref(), payload, &format)?;
        }
        Commands::Compact { entity, dry_run } => {
            let config = FileConfig::load(&cli.config)?;
            commands::compact::run(&config, entity, dry_run)?;
        }
        Commands::Version => {
            println!("OdontoSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
