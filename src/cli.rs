//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Carpool settlement engine operator tool
#[derive(Parser, Debug)]
#[command(name = "carpool-settlement")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "CARPOOL_SETTLEMENT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "CARPOOL_SETTLEMENT_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "CARPOOL_SETTLEMENT_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the payment breakdown for a fare
    Breakdown {
        /// Fare per seat in major units (e.g. 250 or 249.50)
        #[arg(long)]
        fare: String,

        /// Seats sold
        #[arg(long, default_value_t = 1)]
        seats: u32,
    },

    /// Print the effective configuration
    Config {
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
        format: OutputFormat,
    },
}

/// Structured output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// YAML
    Yaml,
    /// JSON
    Json,
}
