// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Run reports
//!
//! Structured summary of one run: the status of every step, which steps
//! failed and why, which steps were blocked and by what, and which branch
//! each condition took along with the compared values.

use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::condition::BranchDecision;
use super::state::{RunState, StepStatus};
use super::{Artifact, DagBuilder};
use crate::errors::{StepFailure, TrainflowResult};

/// Terminal status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Final state of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub id: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<Artifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// A failed step and its error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub step: String,
    /// Short error kind, e.g. `execution_failed`
    pub kind: String,
    pub message: String,
}

impl FailureReport {
    fn new(step: &str, failure: &StepFailure) -> Self {
        Self {
            step: step.to_string(),
            kind: failure.kind().to_string(),
            message: failure.to_string(),
        }
    }
}

/// A step left pending because an upstream step did not succeed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockedReport {
    pub step: String,
    /// Failed or cancelled upstream steps it transitively depends on
    pub blocked_by: Vec<String>,
}

/// Summary of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub pipeline: String,
    pub status: RunStatus,
    /// Steps in execution order
    pub steps: Vec<StepReport>,
    pub failed: Vec<FailureReport>,
    pub blocked: Vec<BlockedReport>,
    pub branches: Vec<BranchDecision>,
    pub parameters: BTreeMap<String, super::Value>,
    pub duration_ms: u64,
}

impl RunReport {
    /// Summarize a finished run
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn collect(
        run_id: &str,
        pipeline: &str,
        dag: &DagBuilder,
        state: &RunState,
        branches: Vec<BranchDecision>,
        parameters: BTreeMap<String, super::Value>,
        cancelled: bool,
        duration: Duration,
    ) -> Self {
        let order = dag.topological_order();
        let mut steps = Vec::with_capacity(order.len());
        let mut failed = Vec::new();
        let mut blocked = Vec::new();

        for id in &order {
            let Some(record) = state.record(id) else {
                continue;
            };

            steps.push(StepReport {
                id: id.clone(),
                status: record.status,
                outputs: record.outputs.values().cloned().collect(),
                duration_ms: record.duration.map(|d| d.as_millis() as u64),
            });

            if let Some(ref failure) = record.failure {
                failed.push(FailureReport::new(id, failure));
            }

            if record.status == StepStatus::Pending {
                let blocked_by: Vec<String> = order
                    .iter()
                    .filter(|upstream| {
                        matches!(
                            state.status(upstream),
                            Some(StepStatus::Failed | StepStatus::Cancelled)
                        ) && dag.depends_on(id, upstream)
                    })
                    .cloned()
                    .collect();

                blocked.push(BlockedReport {
                    step: id.clone(),
                    blocked_by,
                });
            }
        }

        let status = if cancelled {
            RunStatus::Cancelled
        } else if steps
            .iter()
            .all(|s| s.status.is_success() || s.status == StepStatus::NotScheduled)
        {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };

        Self {
            run_id: run_id.to_string(),
            pipeline: pipeline.to_string(),
            status,
            steps,
            failed,
            blocked,
            branches,
            parameters,
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Final status of one step
    pub fn step_status(&self, id: &str) -> Option<StepStatus> {
        self.steps.iter().find(|s| s.id == id).map(|s| s.status)
    }

    /// Branch decision of one condition step
    pub fn branch(&self, step: &str) -> Option<&BranchDecision> {
        self.branches.iter().find(|b| b.step == step)
    }

    pub fn to_json(&self) -> TrainflowResult<String> {
        serde_json::to_string_pretty(self).map_err(Into::into)
    }

    /// Human-readable summary for the terminal
    pub fn to_text(&self) -> String {
        let mut out = String::new();

        let headline = match self.status {
            RunStatus::Succeeded => format!("✓ Run {} succeeded", self.run_id).green().bold(),
            RunStatus::Failed => format!("✗ Run {} failed", self.run_id).red().bold(),
            RunStatus::Cancelled => format!("⚠ Run {} cancelled", self.run_id).yellow().bold(),
        };
        out.push_str(&format!("{} ({:.2}s)\n\n", headline, self.duration_ms as f64 / 1000.0));

        for step in &self.steps {
            let marker = match step.status {
                StepStatus::Succeeded => "✓".green(),
                StepStatus::Skipped => "✓".green(),
                StepStatus::Failed => "✗".red(),
                StepStatus::NotScheduled => "-".dimmed(),
                StepStatus::Cancelled => "⚠".yellow(),
                _ => "…".yellow(),
            };
            let note = match step.status {
                StepStatus::Skipped => " (cached)".dimmed().to_string(),
                StepStatus::NotScheduled => " (branch not taken)".dimmed().to_string(),
                StepStatus::Pending => " (blocked)".yellow().to_string(),
                StepStatus::Cancelled => " (cancelled)".yellow().to_string(),
                _ => String::new(),
            };
            out.push_str(&format!("  {} {}{}\n", marker, step.id, note));
        }

        if !self.branches.is_empty() {
            out.push_str(&format!("\n{}\n", "Branches:".bold()));
            for decision in &self.branches {
                out.push_str(&format!("  {} → {}\n", decision.step, decision.branch));
                for evaluation in &decision.evaluations {
                    out.push_str(&format!("      {}\n", evaluation));
                }
            }
        }

        if !self.failed.is_empty() {
            out.push_str(&format!("\n{}\n", "Failed:".red().bold()));
            for failure in &self.failed {
                out.push_str(&format!("  {} [{}] {}\n", failure.step, failure.kind, failure.message));
            }
        }

        if !self.blocked.is_empty() {
            out.push_str(&format!("\n{}\n", "Blocked:".yellow().bold()));
            for blocked in &self.blocked {
                out.push_str(&format!(
                    "  {} (by {})\n",
                    blocked.step,
                    blocked.blocked_by.join(", ")
                ));
            }
        }

        out
    }
}
