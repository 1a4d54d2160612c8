// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Per-run step state
//!
//! Owned by a single orchestrator run. Every step reaches exactly one
//! terminal status; later attempts to finish it again are refused.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use super::Artifact;
use crate::backend::ExecutionHandle;
use crate::errors::StepFailure;

/// Lifecycle status of a step within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Ready,
    Running,
    Succeeded,
    /// Reused a cached result without submission
    Skipped,
    Failed,
    /// Inside a condition branch that was not taken
    NotScheduled,
    Cancelled,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Skipped | Self::Failed | Self::NotScheduled | Self::Cancelled
        )
    }

    /// Succeeded or skipped: outputs are available to dependents
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::NotScheduled => "not_scheduled",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// State of one step
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub status: StepStatus,
    /// Outputs by name, set on success
    pub outputs: BTreeMap<String, Artifact>,
    pub failure: Option<StepFailure>,
    /// Backend handle while running
    pub handle: Option<ExecutionHandle>,
    started_at: Option<Instant>,
    pub duration: Option<Duration>,
}

impl StepRecord {
    fn new() -> Self {
        Self {
            status: StepStatus::Pending,
            outputs: BTreeMap::new(),
            failure: None,
            handle: None,
            started_at: None,
            duration: None,
        }
    }
}

/// Step states of one pipeline run
#[derive(Debug, Clone, Default)]
pub struct RunState {
    records: HashMap<String, StepRecord>,
}

impl RunState {
    /// Create a state with every step pending
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            records: ids.into_iter().map(|id| (id.into(), StepRecord::new())).collect(),
        }
    }

    pub fn record(&self, id: &str) -> Option<&StepRecord> {
        self.records.get(id)
    }

    pub fn status(&self, id: &str) -> Option<StepStatus> {
        self.records.get(id).map(|r| r.status)
    }

    /// Move a step to a non-terminal status
    pub fn advance(&mut self, id: &str, status: StepStatus) -> bool {
        let Some(record) = self.open(id) else {
            return false;
        };

        if status == StepStatus::Running {
            record.started_at = Some(Instant::now());
        }
        record.status = status;
        true
    }

    /// Attach the backend handle of a running step
    pub fn set_handle(&mut self, id: &str, handle: ExecutionHandle) {
        if let Some(record) = self.records.get_mut(id) {
            record.handle = Some(handle);
        }
    }

    /// Finish a step successfully; `skipped` marks a cache hit
    pub fn succeed(&mut self, id: &str, outputs: Vec<Artifact>, skipped: bool) -> bool {
        let status = if skipped {
            StepStatus::Skipped
        } else {
            StepStatus::Succeeded
        };

        let Some(record) = self.finish(id, status) else {
            return false;
        };
        record.outputs = outputs.into_iter().map(|a| (a.name.clone(), a)).collect();
        true
    }

    /// Finish a step with a failure
    pub fn fail(&mut self, id: &str, failure: StepFailure) -> bool {
        let Some(record) = self.finish(id, StepStatus::Failed) else {
            return false;
        };
        record.failure = Some(failure);
        true
    }

    /// Finish a step without outputs (not scheduled or cancelled)
    pub fn close(&mut self, id: &str, status: StepStatus) -> bool {
        self.finish(id, status).is_some()
    }

    fn finish(&mut self, id: &str, status: StepStatus) -> Option<&mut StepRecord> {
        let record = self.open(id)?;
        record.status = status;
        record.handle = None;
        record.duration = record.started_at.map(|t| t.elapsed());
        Some(record)
    }

    fn open(&mut self, id: &str) -> Option<&mut StepRecord> {
        let record = self.records.get_mut(id)?;
        if record.status.is_terminal() {
            tracing::warn!(step = %id, status = %record.status, "Ignoring transition of finished step");
            return None;
        }
        Some(record)
    }

    /// Ids with the given status, sorted
    pub fn with_status(&self, status: StepStatus) -> Vec<String> {
        let mut ids: Vec<String> = self
            .records
            .iter()
            .filter(|(_, r)| r.status == status)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of steps with the given status
    pub fn count(&self, status: StepStatus) -> usize {
        self.records.values().filter(|r| r.status == status).count()
    }
}
