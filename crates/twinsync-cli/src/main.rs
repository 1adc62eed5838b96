//! TwinSync CLI - Command-line interface for TwinSync
//!
//! Provides commands for:
//! - Triggering one-shot sync runs
//! - Viewing run status and history
//! - Inspecting the pair table and outstanding conflicts
//! - Validating configuration

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{
    config::ConfigCommand, conflicts::ConflictsCommand, pairs::PairsCommand, run::RunCommand,
    status::StatusCommand,
};
use output::OutputFormat;
use twinsync_core::config::Config;

#[derive(Debug, Parser)]
#[command(name = "twinsync", version, about = "Two-provider remote tree synchronizer")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run one synchronization pass and wait for it
    Run(RunCommand),
    /// Show the last run and pair table summary
    Status(StatusCommand),
    /// List sync pairs
    Pairs(PairsCommand),
    /// List outstanding conflicts
    Conflicts(ConflictsCommand),
    /// View and validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&config_path);

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };

    match cli.command {
        Commands::Run(cmd) => cmd.execute(&config, format).await,
        Commands::Status(cmd) => cmd.execute(&config, format).await,
        Commands::Pairs(cmd) => cmd.execute(&config, format).await,
        Commands::Conflicts(cmd) => cmd.execute(&config, format).await,
        Commands::Config(cmd) => cmd.execute(&config, format).await,
    }
}
