// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Pipeline definitions and execution
//!
//! This module defines the core data structures for trainflow pipelines
//! (steps, property references, conditions) together with the machinery
//! that builds them into a DAG and runs them against a compute backend.

mod builder;
mod condition;
mod dag;
mod definition;
mod orchestrator;
mod report;
mod resolve;
mod state;
mod validation;

pub use builder::{is_valid_name, Pipeline, PipelineBuilder};
pub use condition::{BranchDecision, ConditionEvaluator, Evaluation};
pub use dag::{DagBuilder, EdgeKind, StepNode};
pub use definition::*;
pub use orchestrator::{cancellation, CancelHandle, CancelToken, Orchestrator, RunOptions};
pub use report::{BlockedReport, FailureReport, RunReport, RunStatus, StepReport};
pub use resolve::{resolve, resolve_input, resolve_step_inputs, Resolved, ResolvedInputs};
pub use state::{RunState, StepRecord, StepStatus};
pub use validation::{PipelineValidator, ValidationResult};
