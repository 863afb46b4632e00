use clap::{Parser, Subcommand};
use market::Instrument;

pub mod config;

#[derive(Parser)]
#[command(name = "collector")]
#[command(about = "Samples BTC and gold prices and keeps their daily history filled", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Sample prices and backfill history until stopped (default)
    Run,
    /// Fill missing daily history once and exit
    Backfill,
    /// Show the feed's current prices and what is stored
    Probe,
    /// Show the oldest daily bar the feed has for an instrument
    Earliest {
        /// btc or gold
        instrument: Instrument,
    },
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command.unwrap_or(Commands::Run)
    }
}
