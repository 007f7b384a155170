use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use herald::commands;
use herald::config::Config;

#[derive(Parser)]
#[command(
    name = "herald",
    version,
    about = "WhatsApp campaign dispatch and session orchestration engine",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); falls back to environment variables
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the config file
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine: webhook server, queue workers and monitors
    Serve,

    /// Queue a campaign for dispatch, or drain it in the foreground
    Dispatch {
        /// Campaign to dispatch
        #[arg(short, long)]
        campaign: Uuid,

        /// Run the full send cycle here instead of queueing it
        #[arg(long, default_value = "false")]
        drain: bool,
    },

    /// Recompute a campaign's aggregate statistics
    Stats {
        /// Campaign to recompute
        #[arg(short, long)]
        campaign: Uuid,
    },

    /// Summarize a workspace's accounts
    Accounts {
        /// Workspace to summarize
        #[arg(short, long)]
        workspace: Uuid,

        /// Account to pin to an instance (requires --instance)
        #[arg(long)]
        pin: Option<Uuid>,

        /// Instance index to pin the account to
        #[arg(long)]
        instance: Option<usize>,
    },

    /// Create or update the database schema
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&format, &config.logging.level, cli.verbose)?;

    tracing::info!("Herald dispatch engine starting");

    match cli.command {
        Commands::Serve => {
            tracing::info!(
                host = %config.server.host,
                port = config.server.port,
                "Starting serve command"
            );
            commands::serve(config).await?;
        }

        Commands::Dispatch { campaign, drain } => {
            tracing::info!(
                campaign_id = %campaign,
                drain = %drain,
                "Starting dispatch command"
            );
            commands::dispatch(config, campaign, drain).await?;
        }

        Commands::Stats { campaign } => {
            tracing::info!(campaign_id = %campaign, "Starting stats command");
            commands::stats(config, campaign).await?;
        }

        Commands::Accounts {
            workspace,
            pin,
            instance,
        } => {
            tracing::info!(
                workspace_id = %workspace,
                pin = ?pin,
                instance = ?instance,
                "Starting accounts command"
            );
            commands::accounts(config, workspace, pin, instance).await?;
        }

        Commands::Migrate => {
            tracing::info!("Starting migrate command");
            commands::migrate(config).await?;
        }
    }

    tracing::info!("Herald completed successfully");
    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("herald=debug,info")
    } else {
        tracing_subscriber::EnvFilter::new(format!("herald={level},warn"))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
