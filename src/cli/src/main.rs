//! Portguard CLI - drive a running Portguard server from the terminal.
//!
//! Provides commands for status, recovery sessions, test mode, single-error
//! fixes, backups, health, and CLI configuration.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{backups, config, health, recovery};
use output::OutputFormat;

const DEFAULT_API_URL: &str = "http://localhost:7070";

/// Portguard - service health monitor and recovery orchestrator CLI
#[derive(Parser)]
#[command(
    name = "portguard",
    version,
    about = "Portguard - service health monitor and recovery orchestrator",
    long_about = "CLI tool for inspecting fleet status and driving recovery sessions on a Portguard server.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// API server URL
    #[arg(long, global = true, env = "PORTGUARD_API_URL")]
    api_url: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current recovery state, stats, diagnostics and steps
    Status,

    /// Start a recovery session
    Recover(recovery::RecoverArgs),

    /// Enable or disable synthetic fault injection
    TestMode(recovery::TestModeArgs),

    /// Remediate a single diagnostic error by id
    Fix(recovery::FixArgs),

    /// List pre-remediation backups
    Backups,

    /// Check server liveness
    Health,

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let settings = config::load_settings();
    let api_url = cli
        .api_url
        .clone()
        .or_else(|| settings.api_url.clone())
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());

    let client = client::ApiClient::new(&api_url)?;
    let format = cli.output;

    let result = match cli.command {
        Commands::Status => recovery::status(&client, format).await,
        Commands::Recover(args) => recovery::recover(args, &settings, &client, format).await,
        Commands::TestMode(args) => recovery::test_mode(args, &client, format).await,
        Commands::Fix(args) => recovery::fix(args, &client, format).await,
        Commands::Backups => backups::execute(&client, format).await,
        Commands::Health => health::execute(&client, format).await,
        Commands::Config(cmd) => config::execute(cmd, format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
