use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stormcast::logging::{LogFormat, init_tracing};

mod cmd;

#[derive(Parser)]
#[command(name = "stormcast")]
#[command(version, about = "Tropical storm forecasts from a language model, refined by self-critique")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit log events as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Path to the config file. Defaults to ./stormcast.toml when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Model identifier. Overrides stormcast.toml and STORMCAST_MODEL.
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Maximum number of track samples embedded in each prompt
    #[arg(long, global = true)]
    pub max_history: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Forecast every live storm, then quality-check each horizon
    Run {
        /// Read track records from a JSON file instead of the live feed
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Print the full run report, including attempt logs
        #[arg(long)]
        report: bool,
    },
    /// Forecast every live storm with one multi-horizon prompt each
    Campaign {
        /// Read track records from a JSON file instead of the live feed
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Print the full run report, including attempt logs
        #[arg(long)]
        report: bool,
    },
    /// Print the generation prompts without calling the service
    Prompts {
        /// Read track records from a JSON file instead of the live feed
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Only show prompts for this storm
        #[arg(long)]
        storm: Option<String>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration
    Validate,
    /// Write a default stormcast.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    let log_format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    init_tracing(cli.verbose, log_format);

    let working_dir = std::env::current_dir().context("Failed to get current directory")?;

    match &cli.command {
        Commands::Run { input, report } => {
            cmd::cmd_run(&cli, &working_dir, input.as_deref(), *report).await?;
        }
        Commands::Campaign { input, report } => {
            cmd::cmd_campaign(&cli, &working_dir, input.as_deref(), *report).await?;
        }
        Commands::Prompts { input, storm } => {
            cmd::cmd_prompts(&cli, &working_dir, input.as_deref(), storm.as_deref()).await?;
        }
        Commands::Config { command } => cmd::cmd_config(&cli, &working_dir, command.clone())?,
    }

    Ok(())
}
