//! watchtower - watch-and-compile supervisor for Elm with hot reload.

mod actor;
mod cli;
mod compile;
mod config;
mod core;
mod inject;
mod logger;
mod output;
mod postprocess;
mod project;
mod reload;

use anyhow::{Context, Result};
use clap::{ColorChoice, Parser};

use cli::{Cli, Commands};
use crate::core::AbsolutePath;

fn main() -> Result<()> {
    // Setup global Ctrl+C handler (before any blocking operations)
    let shutdown_rx = crate::core::setup_shutdown_handler()?;

    let cli = Cli::parse();

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }

    match cli.command {
        Commands::Hot {
            filters,
            port,
            verbose,
        } => {
            logger::set_verbose(verbose);

            let cwd = AbsolutePath::current_dir().context("cannot determine current directory")?;
            let config_path = AbsolutePath::resolve(&cwd, &cli.config);

            let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
            runtime.block_on(
                actor::Coordinator::new(config_path, filters, port, shutdown_rx).run(),
            )
        }
    }
}
