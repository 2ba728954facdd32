//! Conclave CLI — the main entry point.
//!
//! Commands:
//! - `init`        — Write a default config file
//! - `serve`       — Start the HTTP gateway
//! - `migrate`     — Create or upgrade the SQLite schema
//! - `credits`     — Grant credits and inspect balances
//! - `deliberate`  — Run a deliberation locally and print each round
//! - `doctor`      — Diagnose configuration and provider health

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "conclave",
    about = "Conclave — multi-agent deliberation orchestrator",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file (defaults to ~/.conclave/config.toml)
    #[arg(short, long, global = true, env = "CONCLAVE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init,

    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override the bind address
        #[arg(long)]
        host: Option<String>,
    },

    /// Create or upgrade the database schema
    Migrate {
        /// Database file (defaults to storage.path)
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Manage user credits
    Credits {
        #[command(subcommand)]
        action: commands::credits::CreditsAction,
    },

    /// Run a deliberation locally and print every round
    Deliberate {
        /// The question put to the council
        prompt: String,

        /// Agent as id:name:specialty:provider:model (repeatable)
        #[arg(short, long = "agent", required = true)]
        agents: Vec<String>,

        /// Number of rounds
        #[arg(short, long)]
        rounds: Option<u32>,
    },

    /// Diagnose configuration and provider health
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Init => commands::init::run(config_path).await?,
        Commands::Serve { port, host } => commands::serve::run(config_path, port, host).await?,
        Commands::Migrate { db } => commands::migrate::run(config_path, db).await?,
        Commands::Credits { action } => commands::credits::run(config_path, action).await?,
        Commands::Deliberate {
            prompt,
            agents,
            rounds,
        } => commands::deliberate::run(config_path, prompt, agents, rounds).await?,
        Commands::Doctor => commands::doctor::run(config_path).await?,
    }

    Ok(())
}
