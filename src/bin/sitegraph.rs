//! sitegraph CLI binary
//!
//! Command-line interface for the incremental site build core.

use anyhow::Context;
use clap::Parser;
use sitegraph::cli::{map_error, Cli, Commands, RunContext};
use sitegraph::config::ConfigLoader;
use sitegraph::logging::{init_logging, LoggingConfig};
use std::process;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let logging_config = build_logging_config(&cli);
    if let Err(e) = init_logging(&logging_config) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    if let Err(e) = run(cli).await {
        error!("Command failed: {:#}", e);
        match e.downcast_ref::<sitegraph::error::BuildError>() {
            Some(build_error) => eprintln!("{}", map_error(build_error)),
            None => eprintln!("{:#}", e),
        }
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let context = RunContext::new(cli.site_root.clone(), cli.config.clone())
        .with_context(|| format!("loading site at {}", cli.site_root.display()))?;
    info!(site_root = %cli.site_root.display(), "sitegraph starting");

    let output = context.execute(&cli.command).await?;
    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}

/// Build logging configuration from CLI args and the site config file
///
/// Workers always log to stderr; their stdout carries the RPC channel.
fn build_logging_config(cli: &Cli) -> LoggingConfig {
    if !cli.verbose && cli.log_level.is_none() {
        return LoggingConfig::off();
    }

    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(&cli.site_root),
    }
    .map(|c| c.logging)
    .unwrap_or_default();

    if let Some(level) = &cli.log_level {
        config.level = level.clone();
    }
    if let Some(format) = cli.log_format {
        config.format = format;
    }
    if let Some(output) = cli.log_output {
        config.output = output;
    }
    if let Some(file) = &cli.log_file {
        config.file = file.clone();
    }

    if matches!(cli.command, Commands::Worker) {
        config.for_worker()
    } else {
        config
    }
}
