//! DriftSync CLI
//!
//! Command-line tools for a DriftSync client database.
//!
//! # Commands
//!
//! - `inspect` - Display schema version, cached rows, outbox and counters
//! - `outbox` - List queued actions
//! - `revive` - Return dead actions to the queue
//! - `purge-dead` - Delete dead actions
//! - `clear` - Delete cached rows
//! - `probe` - Check the backend is reachable
//! - `drain` - Replay the outbox against the backend

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// DriftSync command-line tools.
#[derive(Parser)]
#[command(name = "driftsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the client database file
    #[arg(global = true, short, long)]
    db: Option<PathBuf>,

    /// Base URL of the backend
    #[arg(global = true, short, long)]
    url: Option<String>,

    /// Account whose data is synchronized
    #[arg(global = true, short, long)]
    account: Option<String>,

    /// Bearer token for the backend
    #[arg(global = true, long)]
    token: Option<String>,

    /// Output format (text, json)
    #[arg(global = true, short, long, default_value = "text")]
    format: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display schema version, row counts, outbox and counters
    Inspect,

    /// List queued actions, oldest first
    Outbox {
        /// Only dead actions
        #[arg(long, conflicts_with = "status")]
        dead: bool,

        /// Only actions in this state (pending, syncing, failed, dead)
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum number of actions to list
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Return dead actions to the queue with their attempts reset
    Revive {
        /// Action to revive
        #[arg(required_unless_present = "all")]
        id: Option<String>,

        /// Revive every dead action
        #[arg(long, conflicts_with = "id")]
        all: bool,
    },

    /// Delete every dead action
    PurgeDead,

    /// Delete cached rows, or everything when no table is given
    Clear {
        /// Only this table (profile, course, question, progress, wallet)
        #[arg(short, long)]
        table: Option<String>,
    },

    /// Check the backend answers its health endpoint
    Probe {
        /// Probe timeout in seconds
        #[arg(long, default_value = "5")]
        timeout: u64,
    },

    /// Replay queued actions until the outbox is idle
    Drain {
        /// Maximum number of reconciliation ticks
        #[arg(short, long, default_value = "100")]
        max_ticks: usize,
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
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let format = cli.format.as_str();
    match cli.command {
        Commands::Inspect => {
            let db = cli.db.ok_or("Database path required for inspect")?;
            commands::inspect::run(&db, format).await?;
        }
        Commands::Outbox {
            dead,
            status,
            limit,
        } => {
            let db = cli.db.ok_or("Database path required for outbox")?;
            let status = if dead { Some("dead".to_string()) } else { status };
            commands::outbox::run(&db, status.as_deref(), limit, format).await?;
        }
        Commands::Revive { id, all } => {
            let db = cli.db.ok_or("Database path required for revive")?;
            let target = if all {
                commands::revive::Target::All
            } else {
                commands::revive::Target::One(id.ok_or("Action id or --all required")?)
            };
            commands::revive::run(&db, target, format).await?;
        }
        Commands::PurgeDead => {
            let db = cli.db.ok_or("Database path required for purge-dead")?;
            commands::purge::run(&db, format).await?;
        }
        Commands::Clear { table } => {
            let db = cli.db.ok_or("Database path required for clear")?;
            commands::clear::run(&db, table.as_deref(), format).await?;
        }
        Commands::Probe { timeout } => {
            let url = cli.url.ok_or("Backend URL required for probe")?;
            commands::probe::run(&url, cli.token.as_deref(), timeout, format).await?;
        }
        Commands::Drain { max_ticks } => {
            let db = cli.db.ok_or("Database path required for drain")?;
            let url = cli.url.ok_or("Backend URL required for drain")?;
            let account = cli.account.ok_or("Account required for drain")?;
            let options = commands::drain::DrainOptions {
                url,
                account,
                token: cli.token,
                max_ticks,
            };
            commands::drain::run(&db, options, format).await?;
        }
        Commands::Version => {
            println!("DriftSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Store schema v{}", driftsync_store::SCHEMA_VERSION);
        }
    }

    Ok(())
}
