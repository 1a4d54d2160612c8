// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Run command - execute a registered pipeline

use colored::Colorize;
use miette::Result;
use std::sync::Arc;

use super::{explain, open_cache, open_store, OutputFormat};
use crate::backend::LocalBackend;
use crate::config::Settings;
use crate::pipeline::{cancellation, Orchestrator, RunOptions};
use crate::registry::PipelineRegistry;
use crate::utils::create_spinner;

/// Run a pipeline by name
pub async fn run(
    name: String,
    overrides: Vec<String>,
    no_cache: bool,
    format: OutputFormat,
    settings: &Settings,
    verbose: bool,
) -> Result<()> {
    let store = open_store(settings);
    let pipeline = PipelineRegistry::new(Arc::clone(&store))
        .load(&name)
        .await
        .map_err(explain)?;

    // Overrides are checked before anything is submitted
    let parameters = pipeline.bind_parameters(&overrides)?;

    if verbose && format == OutputFormat::Text {
        eprintln!("{}", "Parameters:".bold());
        for (name, value) in &parameters {
            eprintln!("  {} = {}", name, value);
        }
        eprintln!();
    }

    let backend = LocalBackend::new(&settings.workspace)?;

    let options = RunOptions {
        poll_interval: settings.poll_interval(),
        max_concurrency: settings.max_concurrency,
        no_cache,
        run_id: None,
    };

    let mut orchestrator = Orchestrator::new(Arc::new(backend), Arc::clone(&store)).with_options(options);
    if !no_cache {
        if let Some(policy) = open_cache(settings, store)? {
            orchestrator = orchestrator.with_cache(policy);
        }
    }

    // Ctrl-C cancels the run; in-flight steps are stopped by the backend
    let (handle, token) = cancellation();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling run");
            handle.cancel();
        }
    });

    let spinner = (format == OutputFormat::Text)
        .then(|| create_spinner(&format!("Running pipeline '{}'...", pipeline.name())));

    let result = orchestrator.run_with_cancel(&pipeline, parameters, token).await;

    interrupt.abort();
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let report = result?;

    match format {
        OutputFormat::Text => print!("{}", report.to_text()),
        OutputFormat::Json => println!("{}", report.to_json()?),
    }

    if report.succeeded() {
        Ok(())
    } else {
        Err(miette::miette!("Run {} {}", report.run_id, report.status))
    }
}
