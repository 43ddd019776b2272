//! CLI interface for tickflow
//!
//! Provides subcommands for:
//! - `run`: Start the ingestion and aggregation pipeline
//! - `config`: Show the effective configuration

mod run;

pub use run::RunArgs;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "tickflow")]
#[command(about = "Market tick ingestion and streaming candle aggregation")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the ingestion and aggregation pipeline
    Run(RunArgs),
    /// Show the effective configuration
    Config,
}
