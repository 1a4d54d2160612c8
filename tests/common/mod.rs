// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use trainflow::backend::{ComputeBackend, ExecutionHandle, JobStatus, StepRequest};
use trainflow::errors::BackendError;
use trainflow::pipeline::{
    Artifact, Condition, Input, Operator, Parameter, Pipeline, PipelineBuilder, RunOptions, Step,
};
use trainflow::store::{output_location, ArtifactStore, MemoryStore};

/// What a scripted step does when submitted
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Succeed, writing the given bytes for named outputs and `ok` for the rest
    Succeed(HashMap<String, Vec<u8>>),
    /// Fail with a message
    Fail(String),
    /// Succeed without writing any output
    Silent,
    /// Stay running until cancelled
    Hang,
    /// Succeed like `Succeed(empty)`, but only report it after a delay
    Slow(Duration),
}

impl Outcome {
    pub fn with_output(output: &str, content: impl Into<Vec<u8>>) -> Self {
        let mut outputs = HashMap::new();
        outputs.insert(output.to_string(), content.into());
        Self::Succeed(outputs)
    }
}

struct Job {
    request: StepRequest,
    status: JobStatus,
    finishes_at: Option<Instant>,
}

/// In-memory backend whose steps finish according to a script
pub struct ScriptedBackend {
    store: Arc<MemoryStore>,
    scripts: Mutex<HashMap<String, Outcome>>,
    submitted: Mutex<Vec<StepRequest>>,
    jobs: Mutex<HashMap<String, Job>>,
    cancellable: bool,
}

impl ScriptedBackend {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            scripts: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            jobs: Mutex::new(HashMap::new()),
            cancellable: true,
        }
    }

    /// Refuse cancellation requests, as some remote backends do
    pub fn uncancellable(mut self) -> Self {
        self.cancellable = false;
        self
    }

    /// Jobs submitted but not yet released
    pub fn live_jobs(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn script(self, step: &str, outcome: Outcome) -> Self {
        self.scripts.lock().unwrap().insert(step.to_string(), outcome);
        self
    }

    /// Ids of submitted steps, in submission order
    pub fn submitted(&self) -> Vec<String> {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.step_id.clone())
            .collect()
    }

    /// The most recent request a step was submitted with
    pub fn request(&self, step: &str) -> Option<StepRequest> {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.step_id == step)
            .cloned()
    }
}

#[async_trait]
impl ComputeBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn submit(&self, request: &StepRequest) -> Result<ExecutionHandle, BackendError> {
        let outcome = self
            .scripts
            .lock()
            .unwrap()
            .get(&request.step_id)
            .cloned()
            .unwrap_or_else(|| Outcome::Succeed(HashMap::new()));

        let finishes_at = match outcome {
            Outcome::Slow(delay) => Some(Instant::now() + delay),
            _ => None,
        };

        let status = match outcome {
            Outcome::Slow(_) => {
                for output in &request.outputs {
                    let location = output_location(&request.run_id, &request.step_id, &output.name);
                    self.store.write(&location, b"ok").await.unwrap();
                }
                JobStatus::succeeded()
            }
            Outcome::Succeed(contents) => {
                for output in &request.outputs {
                    let location = output_location(&request.run_id, &request.step_id, &output.name);
                    let data = contents.get(&output.name).cloned().unwrap_or_else(|| b"ok".to_vec());
                    self.store.write(&location, &data).await.unwrap();
                }
                JobStatus::succeeded()
            }
            Outcome::Fail(message) => JobStatus::failed(message),
            Outcome::Silent => JobStatus::succeeded(),
            Outcome::Hang => JobStatus::running(),
        };

        let id = format!("{}/{}", request.run_id, request.step_id);
        self.submitted.lock().unwrap().push(request.clone());
        self.jobs.lock().unwrap().insert(
            id.clone(),
            Job {
                request: request.clone(),
                status,
                finishes_at,
            },
        );

        Ok(ExecutionHandle::new(id))
    }

    async fn poll(&self, handle: &ExecutionHandle) -> Result<JobStatus, BackendError> {
        self.jobs
            .lock()
            .unwrap()
            .get(&handle.id)
            .map(|job| match job.finishes_at {
                Some(at) if Instant::now() < at => JobStatus::running(),
                _ => job.status.clone(),
            })
            .ok_or_else(|| BackendError::Unavailable {
                message: format!("unknown job {}", handle),
            })
    }

    async fn fetch_output(
        &self,
        handle: &ExecutionHandle,
        output: &str,
    ) -> Result<Artifact, BackendError> {
        let jobs = self.jobs.lock().unwrap();
        let job = jobs.get(&handle.id).ok_or_else(|| BackendError::Unavailable {
            message: format!("unknown job {}", handle),
        })?;
        let declared = job
            .request
            .outputs
            .iter()
            .find(|o| o.name == output)
            .ok_or_else(|| BackendError::OutputMissing {
                step: job.request.step_id.clone(),
                output: output.to_string(),
            })?;

        Ok(Artifact::new(
            output,
            output_location(&job.request.run_id, &job.request.step_id, output),
            declared.content_type.clone(),
        ))
    }

    async fn cancel(&self, handle: &ExecutionHandle) -> Result<bool, BackendError> {
        if !self.cancellable {
            return Ok(false);
        }
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&handle.id) {
            if !job.status.is_finished() {
                job.status = JobStatus::failed("cancelled");
            }
        }
        Ok(true)
    }

    async fn release(&self, handle: &ExecutionHandle) -> Result<(), BackendError> {
        self.jobs.lock().unwrap().remove(&handle.id);
        Ok(())
    }
}

/// Options that keep polling fast and the run id predictable
pub fn options(run_id: &str) -> RunOptions {
    RunOptions {
        poll_interval: Duration::from_millis(5),
        run_id: Some(run_id.to_string()),
        ..RunOptions::default()
    }
}

/// Evaluation document as written by an eval step
pub fn evaluation(accuracy: f64) -> Vec<u8> {
    format!(r#"{{"metrics": {{"accuracy": {{"value": {}}}}}}}"#, accuracy).into_bytes()
}

/// prep -> train -> eval -> check(accuracy >= threshold) ? register : alert
pub fn gated_pipeline() -> Pipeline {
    PipelineBuilder::new("training")
        .description("train a model and register it if it is accurate enough")
        .parameter(Parameter::float("threshold", 0.1))
        .parameter(Parameter::integer("epochs", 2))
        .step(
            Step::processing("prep", "python prep.py")
                .with_input("rows", Input::parameter("epochs"))
                .with_output("data", "text/csv"),
        )
        .step(
            Step::training("train", "python train.py")
                .with_input("data", Input::output("prep", "data"))
                .with_hyperparameter("epochs", Input::parameter("epochs"))
                .with_output("model", "application/octet-stream"),
        )
        .step(
            Step::processing("eval", "python eval.py")
                .with_input("model", Input::output("train", "model"))
                .with_output("evaluation", "application/json"),
        )
        .step(Step::condition(
            "check",
            vec![Condition::new(
                Input::json("eval", "evaluation", "metrics.accuracy.value"),
                Operator::GreaterThanOrEqual,
                Input::parameter("threshold"),
            )],
            vec![Step::registration("register", "python register.py", "models")
                .with_input("model", Input::output("train", "model"))],
            vec![Step::processing("alert", "echo accuracy too low")
                .with_input("report", Input::output("eval", "evaluation"))],
        ))
        .build()
        .unwrap()
}
