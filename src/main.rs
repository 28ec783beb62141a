//! Carpool settlement operator tool

use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::error;

use carpool_settlement::{
    cli::{Cli, Command, OutputFormat},
    config::Config,
    payment::{FeeSchedule, calculate_payment_breakdown, parse_fare},
    setup_tracing,
};

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Command::Breakdown { fare, seats } => run_breakdown(cli.config.as_deref(), &fare, seats),
        Command::Config { format } => run_config(cli.config.as_deref(), format),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Print the payment breakdown for `fare` x `seats` as JSON
fn run_breakdown(config: Option<&Path>, fare: &str, seats: u32) -> anyhow::Result<()> {
    let config = Config::load(config).context("Failed to load configuration")?;
    let fees = FeeSchedule::from_config(&config.payments);

    let fare = parse_fare(fare)?;
    let breakdown = calculate_payment_breakdown(fare, seats, &fees)?;

    println!("{}", serde_json::to_string_pretty(&breakdown)?);
    Ok(())
}

/// Print the effective configuration
fn run_config(config: Option<&Path>, format: OutputFormat) -> anyhow::Result<()> {
    let config = Config::load(config).context("Failed to load configuration")?;
    let out = match format {
        OutputFormat::Yaml => serde_yaml::to_string(&config)?,
        OutputFormat::Json => serde_json::to_string_pretty(&config)?,
    };
    println!("{out}");
    Ok(())
}
