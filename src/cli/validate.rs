// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Validate command - check a pipeline definition

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use crate::pipeline::{Pipeline, PipelineDefinition, PipelineValidator};

/// Run the validate command
pub async fn run(definition_path: PathBuf, verbose: bool) -> Result<()> {
    println!("{}", "Validating pipeline...".bold());
    println!();

    let definition = match PipelineDefinition::from_file(&definition_path) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("  {} Failed to parse definition", "✗".red());
            eprintln!();
            return Err(e.into());
        }
    };

    println!("  {} Definition parsed", "✓".green());

    let validation = PipelineValidator::validate(&definition);

    if !validation.errors.is_empty() {
        println!();
        println!("{}:", "Errors".red().bold());
        for error in &validation.errors {
            println!("  {} {}", "✗".red(), error);
        }
    }

    if !validation.warnings.is_empty() {
        println!();
        println!("{}:", "Warnings".yellow().bold());
        for warning in &validation.warnings {
            println!("  {} {}", "⚠".yellow(), warning);
        }
    }

    if verbose && !validation.info.is_empty() {
        println!();
        println!("{}:", "Notes".blue().bold());
        for note in &validation.info {
            println!("  {} {}", "→".blue(), note);
        }
    }

    println!();

    if !validation.is_valid() {
        return Err(miette::miette!("Pipeline validation failed"));
    }

    if verbose {
        if let Ok(pipeline) = Pipeline::from_definition(definition) {
            println!("{}:", "Execution order".bold());
            println!("{}", pipeline.dag().to_text());
        }
    }

    if validation.has_warnings() {
        println!("{}", "Pipeline is valid but has warnings.".yellow().bold());
    } else {
        println!("{}", "Pipeline is valid!".green().bold());
    }

    Ok(())
}
