// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for trainflow.

pub mod cache;
pub mod create;
pub mod graph;
pub mod run;
pub mod validate;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::{CachingPolicy, FilesystemCache};
use crate::config::Settings;
use crate::errors::TrainflowError;
use crate::pipeline::{Pipeline, PipelineDefinition};
use crate::registry::PipelineRegistry;
use crate::store::{ArtifactStore, FilesystemStore};

/// Training pipeline orchestrator
///
/// Build, register and run DAGs of training steps.
#[derive(Parser, Debug)]
#[clap(
    name = "trainflow",
    version,
    about = "Training pipeline orchestrator with conditional branches and step caching",
    long_about = None,
    after_help = "Examples:\n\
        trainflow validate pipeline.yaml          Check a pipeline definition\n\
        trainflow create pipeline.yaml            Register a pipeline\n\
        trainflow run training --param epochs=3   Run a registered pipeline\n\
        trainflow graph pipeline.yaml -f mermaid  Show the step graph\n\n\
        See 'trainflow <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Settings file (defaults to trainflow.toml when present)
    #[clap(long, global = true, env = "TRAINFLOW_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a pipeline definition and register it
    Create {
        /// Definition file (YAML or JSON)
        definition: PathBuf,
    },

    /// Run a registered pipeline
    Run {
        /// Pipeline name
        pipeline: String,

        /// Parameter override (NAME=VALUE), repeatable
        #[clap(short, long, value_name = "NAME=VALUE")]
        param: Vec<String>,

        /// Skip cache (force re-execution)
        #[clap(long)]
        no_cache: bool,

        /// Report format
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Validate a pipeline definition
    Validate {
        /// Definition file to validate
        definition: PathBuf,
    },

    /// Show a pipeline as a graph
    Graph {
        /// Definition file
        definition: PathBuf,

        /// Output format
        #[clap(short, long, value_enum, default_value_t = GraphFormat::Text)]
        format: GraphFormat,
    },

    /// Cache management
    Cache {
        #[clap(subcommand)]
        action: CacheAction,
    },
}

/// Cache management actions
#[derive(Subcommand, Debug, Clone)]
pub enum CacheAction {
    /// Show cache statistics
    Stats,

    /// Clear the cache
    Clear {
        /// Skip confirmation
        #[clap(short, long)]
        yes: bool,
    },
}

/// Output format for the run report
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}

/// Read and build a definition file
pub(crate) fn load_pipeline(path: &Path) -> miette::Result<Pipeline> {
    let definition = PipelineDefinition::from_file(path).map_err(explain)?;
    Pipeline::from_definition(definition).map_err(|e| explain(e.into()))
}

/// Print the recovery hint for an error, if there is one
pub(crate) fn explain(error: TrainflowError) -> miette::Report {
    if let Some(suggestion) = error.suggestion() {
        eprintln!("{}", suggestion);
    }
    error.into()
}

/// Artifact store rooted at the configured workspace
pub(crate) fn open_store(settings: &Settings) -> Arc<dyn ArtifactStore> {
    Arc::new(FilesystemStore::new(settings.workspace.clone()))
}

pub(crate) fn open_registry(settings: &Settings) -> PipelineRegistry {
    PipelineRegistry::new(open_store(settings))
}

/// Step cache from settings, or `None` when caching is disabled
pub(crate) fn open_cache(
    settings: &Settings,
    artifacts: Arc<dyn ArtifactStore>,
) -> miette::Result<Option<CachingPolicy>> {
    if !settings.cache.enabled {
        return Ok(None);
    }

    let store = FilesystemCache::new(settings.cache.directory.clone())?;
    let policy = CachingPolicy::new(Arc::new(store), artifacts).with_default_ttl(settings.default_ttl()?);
    Ok(Some(policy))
}
