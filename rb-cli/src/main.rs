mod cli;
mod commands;
mod config;

use std::process;

use anyhow::Result;
use clap::Parser;
use tracing::{Level, debug, error};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::cli::{Args, Commands};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        error!("{e:#}");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = config::load(args.config.as_deref())?;
    let config = config::apply_overrides(config, &args);
    config.validate()?;
    debug!(endpoint = %config.endpoint, org_id = %config.org_id, project_id = %config.project_id, "Using configuration");

    match args.command {
        Commands::Export {
            mode,
            format,
            no_consensus,
            output,
        } => commands::export(&config, mode, format, no_consensus, output).await,
        Commands::Upload {
            storage_id,
            input,
            concurrency,
            failed_output,
        } => commands::upload(&config, &storage_id, &input, concurrency, failed_output).await,
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(verbose),
        )
        .init();
}
