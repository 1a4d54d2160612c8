// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Compute backends
//!
//! The orchestrator submits compute steps to a backend, polls them until
//! they finish and fetches their declared outputs. Submission returns as
//! soon as the job is accepted.

mod local;

pub use local::LocalBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::BackendError;
use crate::pipeline::{Artifact, OutputDecl, Program, Resolved, ResolvedInputs, Step, Value};

/// Opaque backend job identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionHandle {
    pub id: String,
}

impl ExecutionHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl std::fmt::Display for ExecutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Job state as reported by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

/// Result of polling a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatus {
    pub fn queued() -> Self {
        Self {
            state: JobState::Queued,
            error: None,
        }
    }

    pub fn running() -> Self {
        Self {
            state: JobState::Running,
            error: None,
        }
    }

    pub fn succeeded() -> Self {
        Self {
            state: JobState::Succeeded,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: JobState::Failed,
            error: Some(error.into()),
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, JobState::Succeeded | JobState::Failed)
    }
}

/// Everything a backend needs to run one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRequest {
    pub run_id: String,
    pub step_id: String,
    pub kind: String,
    pub program: Program,
    pub inputs: BTreeMap<String, Resolved>,
    pub hyperparameters: BTreeMap<String, Resolved>,
    pub parameters: BTreeMap<String, Value>,
    pub outputs: Vec<OutputDecl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_group: Option<String>,
}

impl StepRequest {
    /// Build the request for a compute step; `None` for condition steps
    pub fn new(
        run_id: &str,
        step: &Step,
        resolved: ResolvedInputs,
        parameters: &BTreeMap<String, Value>,
    ) -> Option<Self> {
        let program = step.program()?.clone();
        let model_group = match &step.kind {
            crate::pipeline::StepKind::Registration { model_group, .. } => Some(model_group.clone()),
            _ => None,
        };

        Some(Self {
            run_id: run_id.to_string(),
            step_id: step.id.clone(),
            kind: step.kind_name().to_string(),
            program,
            inputs: resolved.inputs,
            hyperparameters: resolved.hyperparameters,
            parameters: parameters.clone(),
            outputs: step.outputs.clone(),
            model_group,
        })
    }
}

/// Trait for compute backends
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Submit a step; returns once the backend has accepted the job
    async fn submit(&self, request: &StepRequest) -> Result<ExecutionHandle, BackendError>;

    /// Current state of a job
    async fn poll(&self, handle: &ExecutionHandle) -> Result<JobStatus, BackendError>;

    /// Artifact for a declared output of a finished job
    async fn fetch_output(
        &self,
        handle: &ExecutionHandle,
        output: &str,
    ) -> Result<Artifact, BackendError>;

    /// Request cancellation; returns false when the backend cannot cancel
    async fn cancel(&self, _handle: &ExecutionHandle) -> Result<bool, BackendError> {
        Ok(false)
    }

    /// Forget a finished job once its outputs have been collected
    async fn release(&self, _handle: &ExecutionHandle) -> Result<(), BackendError> {
        Ok(())
    }
}
