// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! shipflow - Release Orchestrator
//!
//! Resolve one version per run, publish idempotently and dispatch gated tests.

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shipflow::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output
    let default_filter = if cli.verbose { "shipflow=debug" } else { "shipflow=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    // Dispatch to command handlers
    match cli.command {
        Commands::Run {
            config,
            identity,
            dry_run,
        } => shipflow::cli::run::run(config, identity, dry_run, cli.verbose).await,
        Commands::Version {
            config,
            identity,
            format,
        } => shipflow::cli::version::run(config, identity, format, cli.verbose).await,
        Commands::BuildImages { config, identity } => {
            shipflow::cli::build::run(config, identity, cli.verbose).await
        }
        Commands::PublishPackage { config, identity } => {
            shipflow::cli::publish::run(config, identity, cli.verbose).await
        }
        Commands::DispatchTests { config, identity } => {
            shipflow::cli::dispatch::run(config, identity, cli.verbose).await
        }
        Commands::Validate { config } => shipflow::cli::validate::run(config, cli.verbose).await,
        Commands::Graph { config, format } => {
            shipflow::cli::graph::run(config, format, cli.verbose).await
        }
    }
}
