// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Pipeline orchestrator
//!
//! Runs a built pipeline as a ready-queue scheduler. Every pending step
//! whose dependencies have succeeded is dispatched right away: condition
//! steps are evaluated inline, cache hits finish without submission, and
//! compute steps are submitted to the backend. A background task polls each
//! submitted job and reports its outcome over a channel; only the run loop
//! mutates the run state.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, watch};

use super::condition::{BranchDecision, ConditionEvaluator};
use super::report::RunReport;
use super::resolve::{resolve_step_inputs, ResolvedInputs};
use super::state::{RunState, StepStatus};
use super::{Artifact, OutputDecl, Pipeline, Step, Value};
use crate::backend::{ComputeBackend, ExecutionHandle, JobState, StepRequest};
use crate::cache::{hash_string, CachingPolicy};
use crate::errors::{BackendError, TrainflowResult};
use crate::store::{plan_location, report_location, ArtifactStore};

/// Run options
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Delay between polls of a running job
    pub poll_interval: Duration,
    /// Maximum number of submitted jobs in flight
    pub max_concurrency: Option<usize>,
    /// Skip cache lookups and writes
    pub no_cache: bool,
    /// Fixed run id (generated when absent)
    pub run_id: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_concurrency: None,
            no_cache: false,
            run_id: None,
        }
    }
}

/// Requests cancellation of a run
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

/// Observed by a run to notice cancellation
#[derive(Debug, Clone)]
pub struct CancelToken {
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once cancellation is requested; never if the handle is dropped first
    pub async fn cancelled(&mut self) {
        while !*self.receiver.borrow_and_update() {
            if self.receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Create a linked cancel handle and token
pub fn cancellation() -> (CancelHandle, CancelToken) {
    let (sender, receiver) = watch::channel(false);
    (
        CancelHandle {
            sender: Arc::new(sender),
        },
        CancelToken { receiver },
    )
}

/// Outcome of one submitted job, sent by its poll task
struct Completion {
    step: String,
    result: Result<Vec<Artifact>, BackendError>,
}

/// Per-run mutable bookkeeping, owned by the run loop
struct Run<'p> {
    id: String,
    pipeline: &'p Pipeline,
    parameters: BTreeMap<String, Value>,
    state: RunState,
    branches: Vec<BranchDecision>,
    submitted: HashMap<String, ResolvedInputs>,
    in_flight: usize,
    cancelled: bool,
}

/// Executes pipelines against a compute backend
pub struct Orchestrator {
    backend: Arc<dyn ComputeBackend>,
    store: Arc<dyn ArtifactStore>,
    cache: Option<CachingPolicy>,
    options: RunOptions,
}

impl Orchestrator {
    /// Create an orchestrator without caching
    pub fn new(backend: Arc<dyn ComputeBackend>, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            backend,
            store,
            cache: None,
            options: RunOptions::default(),
        }
    }

    /// Set the caching policy
    pub fn with_cache(mut self, policy: CachingPolicy) -> Self {
        self.cache = Some(policy);
        self
    }

    /// Set run options
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Run a pipeline to completion
    pub async fn run(
        &self,
        pipeline: &Pipeline,
        parameters: BTreeMap<String, Value>,
    ) -> TrainflowResult<RunReport> {
        let (_handle, token) = cancellation();
        self.run_with_cancel(pipeline, parameters, token).await
    }

    /// Run a pipeline, stopping early if `cancel` fires
    pub async fn run_with_cancel(
        &self,
        pipeline: &Pipeline,
        parameters: BTreeMap<String, Value>,
        mut cancel: CancelToken,
    ) -> TrainflowResult<RunReport> {
        let started = Instant::now();
        let order = pipeline.topological_order();

        let mut run = Run {
            id: self
                .options
                .run_id
                .clone()
                .unwrap_or_else(|| new_run_id(pipeline.name())),
            pipeline,
            parameters,
            state: RunState::new(order.iter().cloned()),
            branches: Vec::new(),
            submitted: HashMap::new(),
            in_flight: 0,
            cancelled: false,
        };

        tracing::info!(run_id = %run.id, pipeline = %pipeline.name(), steps = order.len(), "Starting run");
        self.persist(&plan_location(&run.id), pipeline.plan_json()?).await;

        let (sender, mut receiver) = mpsc::unbounded_channel::<Completion>();

        loop {
            if !run.cancelled && cancel.is_cancelled() {
                self.cancel_run(&mut run, &order).await;
            }

            if !run.cancelled {
                self.dispatch_ready(&mut run, &order, &sender).await;
            }

            if run.in_flight == 0 {
                break;
            }

            tokio::select! {
                completion = receiver.recv() => {
                    let Some(completion) = completion else { break };
                    run.in_flight -= 1;
                    self.complete(&mut run, completion).await;
                }
                _ = cancel.cancelled(), if !run.cancelled => {}
            }
        }

        let report = RunReport::collect(
            &run.id,
            pipeline.name(),
            pipeline.dag(),
            &run.state,
            run.branches,
            run.parameters,
            run.cancelled,
            started.elapsed(),
        );

        tracing::info!(
            run_id = %report.run_id,
            status = %report.status,
            failed = report.failed.len(),
            blocked = report.blocked.len(),
            "Run finished"
        );
        self.persist(&report_location(&report.run_id), report.to_json()?).await;

        Ok(report)
    }

    /// Dispatch ready steps until nothing more can start
    async fn dispatch_ready(
        &self,
        run: &mut Run<'_>,
        order: &[String],
        sender: &mpsc::UnboundedSender<Completion>,
    ) {
        let pipeline = run.pipeline;

        loop {
            let mut progressed = false;

            for id in order {
                if run.state.status(id) == Some(StepStatus::Pending) && dependencies_met(run, id) {
                    run.state.advance(id, StepStatus::Ready);
                    tracing::debug!(run_id = %run.id, step = %id, "Step ready");
                }

                if run.state.status(id) != Some(StepStatus::Ready) {
                    continue;
                }

                let Some(step) = pipeline.step(id) else {
                    continue;
                };

                if let Some(conditions) = step.conditions() {
                    self.evaluate_condition(run, id, conditions).await;
                    progressed = true;
                    continue;
                }

                if let Some(limit) = self.options.max_concurrency {
                    if run.in_flight >= limit {
                        continue;
                    }
                }

                self.start(run, step, sender).await;
                progressed = true;
            }

            if !progressed {
                break;
            }
        }
    }

    async fn evaluate_condition(&self, run: &mut Run<'_>, id: &str, conditions: &[super::Condition]) {
        let decision = {
            let evaluator =
                ConditionEvaluator::new(&run.state, self.store.as_ref(), &run.parameters);
            evaluator.decide(id, conditions).await
        };

        match decision {
            Ok(decision) => {
                tracing::info!(
                    run_id = %run.id,
                    step = %id,
                    branch = %decision.branch,
                    "Condition evaluated"
                );

                let dag = run.pipeline.dag();
                for member in dag.branch_members(id, decision.branch.other()) {
                    run.state.close(&member, StepStatus::NotScheduled);
                }
                run.state.succeed(id, Vec::new(), false);
                run.branches.push(decision);
            }
            Err(e) => {
                tracing::warn!(run_id = %run.id, step = %id, error = %e, "Condition failed");
                run.state.fail(id, e.into());
            }
        }
    }

    /// Resolve, consult the cache, and submit one compute step
    async fn start(&self, run: &mut Run<'_>, step: &Step, sender: &mpsc::UnboundedSender<Completion>) {
        let id = step.id.as_str();

        let resolved =
            match resolve_step_inputs(step, &run.state, self.store.as_ref(), &run.parameters).await {
                Ok(resolved) => resolved,
                Err(e) => {
                    tracing::warn!(run_id = %run.id, step = %id, error = %e, "Input resolution failed");
                    run.state.fail(id, e.into());
                    return;
                }
            };

        if let Some(policy) = self.cache_policy() {
            if let Some(entry) = policy.should_skip(step, &resolved).await {
                tracing::info!(run_id = %run.id, step = %id, status = "skipped", "Reusing cached result");
                run.state.succeed(id, entry.outputs, true);
                return;
            }
        }

        let Some(request) = StepRequest::new(&run.id, step, resolved.clone(), &run.parameters) else {
            let e = BackendError::SubmissionRejected {
                step: id.to_string(),
                message: "step has no program to run".into(),
            };
            tracing::warn!(run_id = %run.id, step = %id, error = %e, "Submission rejected");
            run.state.fail(id, e.into());
            return;
        };

        let handle = match self.backend.submit(&request).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(run_id = %run.id, step = %id, error = %e, "Submission rejected");
                run.state.fail(id, e.into());
                return;
            }
        };

        tracing::info!(
            run_id = %run.id,
            step = %id,
            handle = %handle,
            backend = self.backend.name(),
            status = "running",
            "Step submitted"
        );

        run.state.advance(id, StepStatus::Running);
        run.state.set_handle(id, handle.clone());
        run.submitted.insert(id.to_string(), resolved);
        run.in_flight += 1;

        let backend = Arc::clone(&self.backend);
        let store = Arc::clone(&self.store);
        let outputs = step.outputs.clone();
        let interval = self.options.poll_interval;
        let step_id = id.to_string();
        let sender = sender.clone();

        tokio::spawn(async move {
            let result = watch_job(backend, store, &step_id, handle, outputs, interval).await;
            let _ = sender.send(Completion {
                step: step_id,
                result,
            });
        });
    }

    /// Apply the outcome of a submitted job
    async fn complete(&self, run: &mut Run<'_>, completion: Completion) {
        let id = completion.step.as_str();
        let resolved = run.submitted.remove(id);

        if run.cancelled {
            // Results of a cancelled run are discarded and never cached
            if run.state.close(id, StepStatus::Cancelled) {
                tracing::info!(run_id = %run.id, step = %id, "Discarded result of cancelled step");
            }
            return;
        }

        match completion.result {
            Ok(outputs) => {
                if let (Some(policy), Some(step), Some(resolved)) =
                    (self.cache_policy(), run.pipeline.step(id), resolved.as_ref())
                {
                    policy.record(step, resolved, &outputs).await;
                }
                tracing::info!(run_id = %run.id, step = %id, status = "succeeded", "Step finished");
                run.state.succeed(id, outputs, false);
            }
            Err(e) => {
                tracing::warn!(run_id = %run.id, step = %id, status = "failed", error = %e, "Step failed");
                run.state.fail(id, e.into());
            }
        }
    }

    /// Cancel everything not yet finished
    async fn cancel_run(&self, run: &mut Run<'_>, order: &[String]) {
        tracing::warn!(run_id = %run.id, "Cancelling run");
        run.cancelled = true;

        for id in order {
            match run.state.status(id) {
                Some(StepStatus::Pending | StepStatus::Ready) => {
                    run.state.close(id, StepStatus::Cancelled);
                }
                Some(StepStatus::Running) => {
                    let Some(handle) = run.state.record(id).and_then(|r| r.handle.clone()) else {
                        continue;
                    };
                    match self.backend.cancel(&handle).await {
                        Ok(true) => {
                            run.state.close(id, StepStatus::Cancelled);
                        }
                        Ok(false) => {
                            tracing::info!(step = %id, "Backend cannot cancel; waiting for step to finish");
                        }
                        Err(e) => {
                            tracing::warn!(step = %id, error = %e, "Cancel request failed; waiting for step to finish");
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn cache_policy(&self) -> Option<&CachingPolicy> {
        if self.options.no_cache {
            None
        } else {
            self.cache.as_ref()
        }
    }

    async fn persist(&self, location: &str, content: String) {
        if let Err(e) = self.store.write(location, content.as_bytes()).await {
            tracing::warn!(location = %location, error = %e, "Failed to persist run record");
        }
    }
}

fn dependencies_met(run: &Run<'_>, id: &str) -> bool {
    run.pipeline
        .dag()
        .dependencies(id)
        .unwrap_or_default()
        .iter()
        .all(|dep| run.state.status(dep).map_or(false, |s| s.is_success()))
}

/// Follow a job to the end, then release it from the backend
async fn watch_job(
    backend: Arc<dyn ComputeBackend>,
    store: Arc<dyn ArtifactStore>,
    step: &str,
    handle: ExecutionHandle,
    outputs: Vec<OutputDecl>,
    interval: Duration,
) -> Result<Vec<Artifact>, BackendError> {
    let result = collect_outputs(backend.as_ref(), store.as_ref(), step, &handle, &outputs, interval).await;

    if let Err(e) = backend.release(&handle).await {
        tracing::debug!(step = %step, handle = %handle, error = %e, "Could not release job");
    }

    result
}

/// Poll a job until it finishes, then collect and verify its outputs
async fn collect_outputs(
    backend: &dyn ComputeBackend,
    store: &dyn ArtifactStore,
    step: &str,
    handle: &ExecutionHandle,
    outputs: &[OutputDecl],
    interval: Duration,
) -> Result<Vec<Artifact>, BackendError> {
    loop {
        let status = backend.poll(handle).await?;
        match status.state {
            JobState::Queued | JobState::Running => tokio::time::sleep(interval).await,
            JobState::Failed => {
                return Err(BackendError::ExecutionFailed {
                    step: step.to_string(),
                    message: status
                        .error
                        .unwrap_or_else(|| "backend reported failure".into()),
                })
            }
            JobState::Succeeded => break,
        }
    }

    let mut artifacts = Vec::with_capacity(outputs.len());
    for output in outputs {
        let artifact = backend.fetch_output(handle, &output.name).await?;

        let present = store.exists(&artifact.location).await.unwrap_or_else(|e| {
            tracing::warn!(step = %step, error = %e, "Could not check output");
            false
        });
        if !present {
            return Err(BackendError::OutputMissing {
                step: step.to_string(),
                output: output.name.clone(),
            });
        }

        artifacts.push(artifact);
    }

    Ok(artifacts)
}

/// `<pipeline>-<unix seconds>-<short hash>`
fn new_run_id(pipeline: &str) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let digest = hash_string(&format!("{}:{}", pipeline, now.as_nanos()));
    format!("{}-{}-{}", pipeline, now.as_secs(), &digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_format() {
        let id = new_run_id("training");
        let parts: Vec<&str> = id.rsplitn(3, '-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[2], "training");
    }

    #[tokio::test]
    async fn test_step_without_program_fails_instead_of_stalling() {
        use crate::backend::LocalBackend;
        use crate::pipeline::{Condition, Input, Operator, JSON_CONTENT_TYPE};
        use crate::store::MemoryStore;

        let pipeline = Pipeline::build(
            "p",
            vec![],
            vec![
                Step::processing("eval", "true").with_output("evaluation", JSON_CONTENT_TYPE),
                Step::condition(
                    "check",
                    vec![Condition::new(
                        Input::json("eval", "evaluation", "score"),
                        Operator::GreaterThanOrEqual,
                        Input::from(1_i64),
                    )],
                    vec![],
                    vec![],
                ),
            ],
        )
        .unwrap();

        let temp_dir = tempfile::TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(
            Arc::new(LocalBackend::new(temp_dir.path()).unwrap()),
            Arc::new(MemoryStore::new()),
        );
        let mut run = Run {
            id: "r1".into(),
            pipeline: &pipeline,
            parameters: BTreeMap::new(),
            state: RunState::new(pipeline.topological_order()),
            branches: Vec::new(),
            submitted: HashMap::new(),
            in_flight: 0,
            cancelled: false,
        };
        run.state.advance("check", StepStatus::Ready);

        let (sender, _receiver) = mpsc::unbounded_channel();
        let step = pipeline.step("check").unwrap();
        orchestrator.start(&mut run, step, &sender).await;

        assert_eq!(run.state.status("check"), Some(StepStatus::Failed));
        assert_eq!(run.in_flight, 0);
    }

    #[tokio::test]
    async fn test_cancel_token() {
        let (handle, mut token) = cancellation();
        assert!(!token.is_cancelled());

        handle.cancel();
        assert!(token.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .unwrap();
    }
}
