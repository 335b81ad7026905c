//! sweeplet CLI
//!
//! Command-line interface for dispatching parameter sweeps.

mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use sweeplet_core::SweepConfig;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// sweeplet - GPU-capped parameter sweep dispatcher
#[derive(Parser, Debug)]
#[command(name = "sweeplet")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every unfinished job of a sweep
    Run {
        /// Sweep file
        sweep: PathBuf,

        /// Print the expanded commands without launching anything
        #[arg(long)]
        debug: bool,

        /// Print the round report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the jobs a sweep expands to and whether they already finished
    Plan {
        /// Sweep file
        sweep: PathBuf,
    },

    /// Remove lock markers left behind by interrupted rounds
    CleanLock {
        /// Sweep file
        sweep: PathBuf,
    },
}

impl Commands {
    fn sweep(&self) -> &PathBuf {
        match self {
            Commands::Run { sweep, .. } => sweep,
            Commands::Plan { sweep } => sweep,
            Commands::CleanLock { sweep } => sweep,
        }
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let path = cli.command.sweep();
    let mut config = SweepConfig::from_file(path)
        .with_context(|| format!("Failed to load sweep file {}", path.display()))?;

    // Initialize logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        parse_level(&config.logging.level)
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    match cli.command {
        Commands::Run { debug, json, .. } => {
            config.sweep.debug |= debug;
            commands::run(config, json).await?;
        }
        Commands::Plan { .. } => {
            commands::plan(config)?;
        }
        Commands::CleanLock { .. } => {
            commands::clean_lock(&config)?;
        }
    }

    Ok(())
}
