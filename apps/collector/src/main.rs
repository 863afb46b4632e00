use anyhow::Result;
use clap::Parser;
use collector::{Cli, Commands, config::Config};
use tracing_subscriber::EnvFilter;

mod commands;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command() {
        Commands::Run => commands::run(&config).await,
        Commands::Backfill => commands::backfill(&config).await,
        Commands::Probe => commands::probe(&config).await,
        Commands::Earliest { instrument } => commands::earliest(&config, instrument).await,
    }
}
