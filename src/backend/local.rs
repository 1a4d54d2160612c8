// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Local shell backend
//!
//! Runs each step's program through a local shell as a background task.
//! Resolved inputs, hyperparameters and parameters are passed as
//! environment variables, and each declared output gets a path to write:
//!
//! - `TRAINFLOW_RUN_ID`, `TRAINFLOW_STEP_ID`
//! - `TRAINFLOW_INPUT_<NAME>`: artifact path or scalar value
//! - `TRAINFLOW_HP_<NAME>`, `TRAINFLOW_PARAM_<NAME>`
//! - `TRAINFLOW_OUTPUT_<NAME>`: where the program must write the output

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tokio::task::JoinHandle;

use super::{ComputeBackend, ExecutionHandle, JobStatus, StepRequest};
use crate::errors::BackendError;
use crate::pipeline::{Artifact, OutputDecl, Resolved};
use crate::store::{check_location, output_location};

struct Job {
    run_id: String,
    step_id: String,
    outputs: Vec<OutputDecl>,
    status: Arc<Mutex<JobStatus>>,
    task: JoinHandle<()>,
}

/// Backend running steps as local shell processes
pub struct LocalBackend {
    workspace: PathBuf,
    jobs: Mutex<HashMap<String, Job>>,
    next_id: AtomicU64,
}

impl LocalBackend {
    /// Create a backend writing outputs under the artifact store root
    pub fn new(workspace: &Path) -> Result<Self, BackendError> {
        std::fs::create_dir_all(workspace).map_err(|e| BackendError::Unavailable {
            message: format!("cannot create workspace '{}': {}", workspace.display(), e),
        })?;

        let workspace = workspace.canonicalize().map_err(|e| BackendError::Unavailable {
            message: format!("cannot resolve workspace '{}': {}", workspace.display(), e),
        })?;

        Ok(Self {
            workspace,
            jobs: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    fn environment(&self, request: &StepRequest) -> Result<Vec<(String, String)>, BackendError> {
        let mut env = vec![
            ("TRAINFLOW_RUN_ID".to_string(), request.run_id.clone()),
            ("TRAINFLOW_STEP_ID".to_string(), request.step_id.clone()),
        ];

        let render = |resolved: &Resolved| match resolved {
            Resolved::Artifact(a) => self.workspace.join(&a.location).display().to_string(),
            Resolved::Value(v) => v.to_string(),
        };

        for (name, value) in &request.inputs {
            env.push((env_name("INPUT", name), render(value)));
        }
        for (name, value) in &request.hyperparameters {
            env.push((env_name("HP", name), render(value)));
        }
        for (name, value) in &request.parameters {
            env.push((env_name("PARAM", name), value.to_string()));
        }

        for output in &request.outputs {
            let location = output_location(&request.run_id, &request.step_id, &output.name);
            check_location(&location).map_err(|e| BackendError::SubmissionRejected {
                step: request.step_id.clone(),
                message: e.to_string(),
            })?;
            let path = self.workspace.join(location);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| BackendError::SubmissionRejected {
                    step: request.step_id.clone(),
                    message: format!("cannot create output directory: {}", e),
                })?;
            }
            env.push((env_name("OUTPUT", &output.name), path.display().to_string()));
        }

        let mut seen = HashSet::new();
        for (name, _) in &env {
            if !seen.insert(name.as_str()) {
                return Err(BackendError::SubmissionRejected {
                    step: request.step_id.clone(),
                    message: format!("two names map to environment variable {}", name),
                });
            }
        }

        Ok(env)
    }

    fn with_job<T>(
        &self,
        handle: &ExecutionHandle,
        f: impl FnOnce(&Job) -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let jobs = self.jobs.lock().map_err(|_| BackendError::Unavailable {
            message: "job table poisoned".into(),
        })?;

        let job = jobs.get(&handle.id).ok_or_else(|| BackendError::Unavailable {
            message: format!("unknown job '{}'", handle),
        })?;

        f(job)
    }
}

#[async_trait]
impl ComputeBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn submit(&self, request: &StepRequest) -> Result<ExecutionHandle, BackendError> {
        let program = &request.program;

        if program.command.trim().is_empty() {
            return Err(BackendError::SubmissionRejected {
                step: request.step_id.clone(),
                message: "command is empty".into(),
            });
        }

        let shell = which::which(&program.shell).map_err(|e| BackendError::SubmissionRejected {
            step: request.step_id.clone(),
            message: format!("shell '{}' not found: {}", program.shell, e),
        })?;

        let env = self.environment(request)?;

        let mut cmd = Command::new(shell);
        cmd.arg("-c").arg(&program.command);
        cmd.envs(env);
        cmd.kill_on_drop(true);

        let status = Arc::new(Mutex::new(JobStatus::running()));
        let task_status = Arc::clone(&status);
        let step_id = request.step_id.clone();

        let task = tokio::spawn(async move {
            let outcome = match cmd.output().await {
                Ok(output) if output.status.success() => JobStatus::succeeded(),
                Ok(output) => {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    let detail = stderr.lines().last().unwrap_or("").trim().to_string();
                    let code = output
                        .status
                        .code()
                        .map_or_else(|| "signal".to_string(), |c| c.to_string());
                    if detail.is_empty() {
                        JobStatus::failed(format!("exit code {}", code))
                    } else {
                        JobStatus::failed(format!("exit code {}: {}", code, detail))
                    }
                }
                Err(e) => JobStatus::failed(format!("failed to start: {}", e)),
            };

            tracing::debug!(step = %step_id, state = ?outcome.state, "Local job finished");
            if let Ok(mut slot) = task_status.lock() {
                *slot = outcome;
            }
        });

        let id = format!("local-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let job = Job {
            run_id: request.run_id.clone(),
            step_id: request.step_id.clone(),
            outputs: request.outputs.clone(),
            status,
            task,
        };

        self.jobs
            .lock()
            .map_err(|_| BackendError::Unavailable {
                message: "job table poisoned".into(),
            })?
            .insert(id.clone(), job);

        Ok(ExecutionHandle::new(id))
    }

    async fn poll(&self, handle: &ExecutionHandle) -> Result<JobStatus, BackendError> {
        self.with_job(handle, |job| {
            job.status
                .lock()
                .map(|s| s.clone())
                .map_err(|_| BackendError::Unavailable {
                    message: "job status poisoned".into(),
                })
        })
    }

    async fn fetch_output(
        &self,
        handle: &ExecutionHandle,
        output: &str,
    ) -> Result<Artifact, BackendError> {
        self.with_job(handle, |job| {
            let declared = job
                .outputs
                .iter()
                .find(|o| o.name == output)
                .ok_or_else(|| BackendError::OutputMissing {
                    step: job.step_id.clone(),
                    output: output.to_string(),
                })?;

            Ok(Artifact::new(
                output,
                output_location(&job.run_id, &job.step_id, output),
                declared.content_type.clone(),
            ))
        })
    }

    async fn cancel(&self, handle: &ExecutionHandle) -> Result<bool, BackendError> {
        self.with_job(handle, |job| {
            // Dropping the task drops the child, which kill_on_drop terminates
            job.task.abort();
            if let Ok(mut slot) = job.status.lock() {
                if !slot.is_finished() {
                    *slot = JobStatus::failed("cancelled");
                }
            }
            Ok(true)
        })
    }

    async fn release(&self, handle: &ExecutionHandle) -> Result<(), BackendError> {
        self.jobs
            .lock()
            .map_err(|_| BackendError::Unavailable {
                message: "job table poisoned".into(),
            })?
            .remove(&handle.id);
        Ok(())
    }
}

/// `TRAINFLOW_<PREFIX>_<NAME>` with the name upper-cased and non-alphanumerics as `_`
fn env_name(prefix: &str, name: &str) -> String {
    let name: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("TRAINFLOW_{}_{}", prefix, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::JobState;
    use crate::pipeline::{Program, Value};
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tempfile::TempDir;

    fn request(command: &str) -> StepRequest {
        let mut inputs = BTreeMap::new();
        inputs.insert("rows".to_string(), Resolved::Value(Value::Integer(3)));

        StepRequest {
            run_id: "r1".into(),
            step_id: "prep".into(),
            kind: "processing".into(),
            program: Program {
                command: command.into(),
                shell: "sh".into(),
                code_version: None,
            },
            inputs,
            hyperparameters: BTreeMap::new(),
            parameters: BTreeMap::new(),
            outputs: vec![OutputDecl::new("data", "text/plain")],
            model_group: None,
        }
    }

    async fn wait(backend: &LocalBackend, handle: &ExecutionHandle) -> JobStatus {
        for _ in 0..200 {
            let status = backend.poll(handle).await.unwrap();
            if status.is_finished() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job did not finish");
    }

    #[test]
    fn test_env_name() {
        assert_eq!(env_name("INPUT", "train-data"), "TRAINFLOW_INPUT_TRAIN_DATA");
        assert_eq!(env_name("HP", "learning_rate"), "TRAINFLOW_HP_LEARNING_RATE");
    }

    #[tokio::test]
    async fn test_runs_command_and_writes_output() {
        let temp_dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp_dir.path()).unwrap();

        let handle = backend
            .submit(&request("echo \"$TRAINFLOW_INPUT_ROWS\" > \"$TRAINFLOW_OUTPUT_DATA\""))
            .await
            .unwrap();

        assert_eq!(wait(&backend, &handle).await.state, JobState::Succeeded);

        let artifact = backend.fetch_output(&handle, "data").await.unwrap();
        assert_eq!(artifact.location, "runs/r1/prep/data");
        let written = std::fs::read_to_string(temp_dir.path().join(&artifact.location)).unwrap();
        assert_eq!(written.trim(), "3");

        assert!(matches!(
            backend.fetch_output(&handle, "other").await,
            Err(BackendError::OutputMissing { .. })
        ));
    }

    #[tokio::test]
    async fn test_failure_reports_stderr() {
        let temp_dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp_dir.path()).unwrap();

        let handle = backend
            .submit(&request("echo 'out of memory' >&2; exit 3"))
            .await
            .unwrap();

        let status = wait(&backend, &handle).await;
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.error.as_deref(), Some("exit code 3: out of memory"));
    }

    #[tokio::test]
    async fn test_rejects_missing_shell_and_empty_command() {
        let temp_dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp_dir.path()).unwrap();

        let mut missing_shell = request("true");
        missing_shell.program.shell = "definitely-not-a-shell-xyz".into();
        assert!(matches!(
            backend.submit(&missing_shell).await,
            Err(BackendError::SubmissionRejected { .. })
        ));

        assert!(matches!(
            backend.submit(&request("  ")).await,
            Err(BackendError::SubmissionRejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_release_forgets_job() {
        let temp_dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp_dir.path()).unwrap();

        let handle = backend.submit(&request("true")).await.unwrap();
        wait(&backend, &handle).await;
        backend.release(&handle).await.unwrap();

        assert!(backend.jobs.lock().unwrap().is_empty());
        assert!(matches!(
            backend.poll(&handle).await,
            Err(BackendError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejects_output_outside_workspace() {
        let temp_dir = TempDir::new().unwrap();
        let workspace = temp_dir.path().join("a/b/ws");
        let backend = LocalBackend::new(&workspace).unwrap();

        let mut escaping = request("echo x > \"$TRAINFLOW_OUTPUT_DATA\"");
        escaping.outputs = vec![OutputDecl::new("../../../../escaped", "text/plain")];

        assert!(matches!(
            backend.submit(&escaping).await,
            Err(BackendError::SubmissionRejected { .. })
        ));
        assert!(!temp_dir.path().join("a/b/escaped").exists());
        assert!(!workspace.join("runs").exists());
    }

    #[tokio::test]
    async fn test_rejects_colliding_variable_names() {
        let temp_dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp_dir.path()).unwrap();

        let mut colliding = request("true");
        colliding
            .inputs
            .insert("train-data".into(), Resolved::Value(Value::Integer(1)));
        colliding
            .inputs
            .insert("train_data".into(), Resolved::Value(Value::Integer(2)));

        match backend.submit(&colliding).await {
            Err(BackendError::SubmissionRejected { message, .. }) => {
                assert!(message.contains("TRAINFLOW_INPUT_TRAIN_DATA"))
            }
            other => panic!("expected rejection, got {:?}", other.map(|h| h.id)),
        }
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let temp_dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp_dir.path()).unwrap();

        let handle = backend.submit(&request("sleep 30")).await.unwrap();
        assert!(backend.cancel(&handle).await.unwrap());

        let status = backend.poll(&handle).await.unwrap();
        assert_eq!(status, JobStatus::failed("cancelled"));
    }
}
