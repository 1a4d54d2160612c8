// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! trainflow - Training Pipeline Orchestrator

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trainflow::cli::{Cli, Commands};
use trainflow::config::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trainflow=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    let settings = Settings::load(cli.config.as_deref())?;

    // Dispatch to command handlers
    match cli.command {
        Commands::Create { definition } => {
            trainflow::cli::create::run(definition, &settings, cli.verbose).await
        }
        Commands::Run {
            pipeline,
            param,
            no_cache,
            format,
        } => trainflow::cli::run::run(pipeline, param, no_cache, format, &settings, cli.verbose).await,
        Commands::Validate { definition } => {
            trainflow::cli::validate::run(definition, cli.verbose).await
        }
        Commands::Graph { definition, format } => {
            trainflow::cli::graph::run(definition, format, cli.verbose).await
        }
        Commands::Cache { action } => {
            trainflow::cli::cache::run(action, &settings, cli.verbose).await
        }
    }
}
