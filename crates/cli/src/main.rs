//! Adaptive Processing Optimizer CLI
//!
//! A command-line tool for inspecting a running optimizer agent: its
//! report, pools, optimization actions, load forecasts and health.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{forecast, health, report, settings};

/// Adaptive Processing Optimizer CLI
#[derive(Parser)]
#[command(name = "apo")]
#[command(author, version, about = "CLI for the Adaptive Processing Optimizer", long_about = None)]
pub struct Cli {
    /// Agent URL (can also be set via APO_API_URL env var or `apo config set-url`)
    #[arg(long, env = "APO_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the full optimization report
    Report,

    /// Show resource pool utilization
    Pools,

    /// Show recent optimization actions
    Actions {
        /// Maximum number of actions to show
        #[arg(long, short, default_value_t = 10)]
        limit: usize,
    },

    /// Show load forecasts
    Forecast {
        /// Horizon label such as 1h or 6h (all horizons if not specified)
        #[arg(long)]
        horizon: Option<String>,
    },

    /// Show agent health and readiness
    Health,

    /// Manage CLI configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Save the default agent URL
    SetUrl {
        /// Agent URL, e.g. http://localhost:8080
        url: String,
    },

    /// Save the default output format
    SetFormat {
        #[arg(value_enum)]
        format: output::OutputFormat,
    },
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::Config::load()?;
    let api_url = config.resolve_api_url(cli.api_url.as_deref());
    let format = config.resolve_format(cli.format);

    // Config commands must work even when the saved URL is invalid
    let client = || client::ApiClient::new(&api_url);

    match cli.command {
        Commands::Report => report::show_report(&client()?, format).await?,
        Commands::Pools => report::show_pools(&client()?, format).await?,
        Commands::Actions { limit } => report::show_actions(&client()?, limit, format).await?,
        Commands::Forecast { horizon } => {
            forecast::show_forecast(&client()?, horizon, format).await?
        }
        Commands::Health => health::show_health(&client()?, format).await?,
        Commands::Config(config_cmd) => match config_cmd {
            ConfigCommands::Show => settings::show_config(&config, &api_url, format)?,
            ConfigCommands::SetUrl { url } => settings::set_api_url(config, &url)?,
            ConfigCommands::SetFormat { format } => settings::set_format(config, format)?,
        },
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}
