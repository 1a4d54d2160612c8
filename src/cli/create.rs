// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Create command - build a definition and register it

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use super::{load_pipeline, open_registry};
use crate::config::Settings;
use crate::registry::RegisterOutcome;

/// Run the create command
pub async fn run(definition: PathBuf, settings: &Settings, verbose: bool) -> Result<()> {
    let pipeline = load_pipeline(&definition)?;
    let registry = open_registry(settings);

    let outcome = registry.register(&pipeline).await?;

    let message = match outcome {
        RegisterOutcome::Created => format!("Registered pipeline '{}'", pipeline.name()),
        RegisterOutcome::Updated => format!("Updated pipeline '{}'", pipeline.name()),
        RegisterOutcome::Unchanged => format!("Pipeline '{}' is already up to date", pipeline.name()),
    };
    println!("  {} {}", "✓".green(), message);

    if verbose {
        println!();
        println!("{}", pipeline.dag().to_text());
    }

    println!();
    println!("Run it with {}", format!("trainflow run {}", pipeline.name()).cyan());

    Ok(())
}
