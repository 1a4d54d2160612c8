// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! # trainflow - Training Pipeline Orchestrator
//!
//! `trainflow` runs machine-learning pipelines described as a DAG of steps.
//!
//! ## Features
//!
//! - **Deferred properties** - Steps consume outputs of upstream steps that
//!   only exist once those steps have run
//! - **Conditional branches** - Gate steps on values read from JSON outputs
//! - **Step caching** - Skip steps whose inputs and code have not changed
//! - **Failure reports** - See which step failed and what it blocked
//!
//! ## Quick Start
//!
//! ```bash
//! # Check and register a pipeline
//! trainflow validate pipeline.yaml
//! trainflow create pipeline.yaml
//!
//! # Run it
//! trainflow run training --param epochs=3
//! ```

pub mod backend;
pub mod cache;
pub mod cli;
pub mod config;
pub mod errors;
pub mod pipeline;
pub mod registry;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use errors::{TrainflowError, TrainflowResult};
pub use pipeline::{Orchestrator, Pipeline, PipelineBuilder, RunReport, Step};
pub use registry::{PipelineRegistry, RegisterOutcome};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
