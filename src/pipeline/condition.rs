// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Condition evaluation
//!
//! Operands are resolved like any other input and compared numerically.
//! Comparison is strict: strings and artifacts are never coerced, and
//! `>=` is inclusive at the threshold.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::resolve::{resolve_input, Resolved};
use super::state::RunState;
use super::{Branch, Condition, Input, Operator, Value};
use crate::errors::ResolutionError;
use crate::store::ArtifactStore;

/// Outcome of one comparison, kept for the run report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub left: Resolved,
    pub operator: Operator,
    pub right: Resolved,
    pub result: bool,
}

impl std::fmt::Display for Evaluation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {} → {}", self.left, self.operator, self.right, self.result)
    }
}

/// Branch chosen by a condition step, with the comparisons that decided it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchDecision {
    pub step: String,
    pub branch: Branch,
    /// Evaluated comparisons, in order, up to the first false one
    pub evaluations: Vec<Evaluation>,
}

/// Evaluates conditions against a run state
pub struct ConditionEvaluator<'a> {
    state: &'a RunState,
    store: &'a dyn ArtifactStore,
    parameters: &'a BTreeMap<String, Value>,
}

impl<'a> ConditionEvaluator<'a> {
    pub fn new(
        state: &'a RunState,
        store: &'a dyn ArtifactStore,
        parameters: &'a BTreeMap<String, Value>,
    ) -> Self {
        Self {
            state,
            store,
            parameters,
        }
    }

    /// Evaluate a single comparison
    pub async fn evaluate(&self, condition: &Condition) -> Result<Evaluation, ResolutionError> {
        let left = self.operand(&condition.left).await?;
        let right = self.operand(&condition.right).await?;

        let result = condition
            .operator
            .apply(numeric(&left, &condition.left)?, numeric(&right, &condition.right)?);

        Ok(Evaluation {
            left,
            operator: condition.operator,
            right,
            result,
        })
    }

    /// AND all comparisons of a condition step, stopping at the first false
    pub async fn decide(
        &self,
        step: &str,
        conditions: &[Condition],
    ) -> Result<BranchDecision, ResolutionError> {
        let mut evaluations = Vec::with_capacity(conditions.len());
        let mut branch = Branch::If;

        for condition in conditions {
            let evaluation = self.evaluate(condition).await?;
            let result = evaluation.result;
            evaluations.push(evaluation);

            if !result {
                branch = Branch::Else;
                break;
            }
        }

        Ok(BranchDecision {
            step: step.to_string(),
            branch,
            evaluations,
        })
    }

    async fn operand(&self, input: &Input) -> Result<Resolved, ResolutionError> {
        resolve_input(input, self.state, self.store, self.parameters).await
    }
}

fn numeric(resolved: &Resolved, input: &Input) -> Result<f64, ResolutionError> {
    resolved
        .as_value()
        .and_then(Value::as_f64)
        .ok_or_else(|| ResolutionError::TypeMismatch {
            context: format!("condition operand {}", describe(input)),
            expected: "number".into(),
            found: resolved.type_name().into(),
        })
}

fn describe(input: &Input) -> String {
    match input {
        Input::Reference(r) => r.to_string(),
        Input::Parameter { parameter } => format!("parameter '{}'", parameter),
        Input::Literal(v) => format!("'{}'", v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Artifact, JSON_CONTENT_TYPE};
    use crate::store::MemoryStore;

    async fn state_with_accuracy(store: &MemoryStore, accuracy: &str) -> RunState {
        let location = "runs/r1/eval/evaluation";
        let document = format!(r#"{{"metrics": {{"accuracy": {{"value": {}}}}}}}"#, accuracy);
        store.write(location, document.as_bytes()).await.unwrap();

        let mut state = RunState::new(["eval"]);
        state.succeed(
            "eval",
            vec![Artifact::new("evaluation", location, JSON_CONTENT_TYPE)],
            false,
        );
        state
    }

    fn accuracy_at_least(threshold: f64) -> Condition {
        Condition::new(
            Input::json("eval", "evaluation", "metrics.accuracy.value"),
            Operator::GreaterThanOrEqual,
            threshold,
        )
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        let store = MemoryStore::new();
        let state = state_with_accuracy(&store, "0.1").await;
        let parameters = BTreeMap::new();
        let evaluator = ConditionEvaluator::new(&state, &store, &parameters);

        let decision = evaluator.decide("check", &[accuracy_at_least(0.1)]).await.unwrap();
        assert_eq!(decision.branch, Branch::If);
        assert_eq!(decision.evaluations[0].left, Resolved::Value(Value::Float(0.1)));
        assert!(decision.evaluations[0].result);
    }

    #[tokio::test]
    async fn test_below_threshold_takes_else() {
        let store = MemoryStore::new();
        let state = state_with_accuracy(&store, "0.05").await;
        let parameters = BTreeMap::new();
        let evaluator = ConditionEvaluator::new(&state, &store, &parameters);

        let decision = evaluator.decide("check", &[accuracy_at_least(0.1)]).await.unwrap();
        assert_eq!(decision.branch, Branch::Else);
    }

    #[tokio::test]
    async fn test_integer_widens_against_float() {
        let store = MemoryStore::new();
        let state = state_with_accuracy(&store, "1").await;
        let parameters = BTreeMap::new();
        let evaluator = ConditionEvaluator::new(&state, &store, &parameters);

        let evaluation = evaluator.evaluate(&accuracy_at_least(1.0)).await.unwrap();
        assert!(evaluation.result);
    }

    #[tokio::test]
    async fn test_conditions_short_circuit() {
        let store = MemoryStore::new();
        let state = state_with_accuracy(&store, "0.5").await;
        let parameters = BTreeMap::new();
        let evaluator = ConditionEvaluator::new(&state, &store, &parameters);

        // Second condition would fail to resolve; it must never be evaluated
        let unresolvable = Condition::new(
            Input::json("missing", "evaluation", "metrics.f1"),
            Operator::GreaterThan,
            0.0,
        );

        let decision = evaluator
            .decide("check", &[accuracy_at_least(0.9), unresolvable])
            .await
            .unwrap();
        assert_eq!(decision.branch, Branch::Else);
        assert_eq!(decision.evaluations.len(), 1);
    }

    #[tokio::test]
    async fn test_string_operand_is_type_mismatch() {
        let store = MemoryStore::new();
        let state = state_with_accuracy(&store, "\"high\"").await;
        let parameters = BTreeMap::new();
        let evaluator = ConditionEvaluator::new(&state, &store, &parameters);

        let err = evaluator.evaluate(&accuracy_at_least(0.1)).await.unwrap_err();
        assert!(matches!(err, ResolutionError::TypeMismatch { ref found, .. } if found == "string"));
    }

    #[tokio::test]
    async fn test_parameter_operand() {
        let store = MemoryStore::new();
        let state = state_with_accuracy(&store, "0.7").await;
        let mut parameters = BTreeMap::new();
        parameters.insert("threshold".to_string(), Value::Float(0.75));
        let evaluator = ConditionEvaluator::new(&state, &store, &parameters);

        let condition = Condition::new(
            Input::json("eval", "evaluation", "metrics.accuracy.value"),
            Operator::GreaterThanOrEqual,
            Input::parameter("threshold"),
        );
        assert!(!evaluator.evaluate(&condition).await.unwrap().result);
    }
}
