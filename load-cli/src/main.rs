//! # chatload
//!
//! Runs gossip and signal load trials against a chat node swarm.
//!
//! ## Commands
//!
//! - `run`: Run one or more trials and report convergence latency
//! - `check`: Validate and print a configuration file
//!
//! ## Example
//!
//! ```bash
//! # Validate configuration
//! chatload --config chatload.toml check
//!
//! # Five signal trials against real nodes
//! chatload --config chatload.toml run --kind signal --trials 5
//!
//! # Simulated swarm, JSON report
//! chatload run --mock --trials 3 --json
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use load_core::{BenchConfig, TrialKind};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{check, run};

/// Configuration file read when `--config` is not given.
const DEFAULT_CONFIG: &str = "chatload.toml";

/// Gossip/signal load-trial orchestrator.
#[derive(Parser, Debug)]
#[command(name = "chatload")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: ./chatload.toml if present, else built-in defaults)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run trials and report convergence latency
    Run {
        /// Trial kind (overrides trial.kind)
        #[arg(long, short)]
        kind: Option<TrialKind>,

        /// Messages per trial (overrides trial.messages)
        #[arg(long, short)]
        messages: Option<usize>,

        /// Signal deadline in milliseconds (overrides trial.period_ms)
        #[arg(long)]
        period_ms: Option<u64>,

        /// Number of sequential trials
        #[arg(long, short, default_value = "1")]
        trials: usize,

        /// Use the simulated swarm instead of the node-control executable
        #[arg(long)]
        mock: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate and print the configuration
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            kind,
            messages,
            period_ms,
            trials,
            mock,
            json,
        } => {
            let options = run::RunOptions {
                kind,
                messages,
                period_ms,
                trials,
                mock,
                json,
            };
            run::run(config, options).await?;
        }
        Commands::Check => {
            check::run(&config)?;
        }
    }

    Ok(())
}

/// Log to stderr so reports on stdout stay machine-readable.
fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<BenchConfig> {
    match path {
        Some(path) => BenchConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => {
            let default = Path::new(DEFAULT_CONFIG);
            if default.exists() {
                BenchConfig::from_file(default).context("Failed to load ./chatload.toml")
            } else {
                Ok(BenchConfig::default())
            }
        }
    }
}
