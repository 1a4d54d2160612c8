// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Property reference resolution
//!
//! A reference names an upstream step output. Without a `json_path` it
//! resolves to the artifact itself; with one, the artifact is read from the
//! store as JSON and the scalar at the dotted path is extracted. Resolution
//! has no side effects beyond the store read.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::state::RunState;
use super::{is_json_content_type, Artifact, Input, PropertyReference, Step, Value, JSON_CONTENT_TYPE};
use crate::errors::ResolutionError;
use crate::store::ArtifactStore;

/// A resolved operand: an upstream artifact or a scalar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Resolved {
    Artifact(Artifact),
    Value(Value),
}

impl Resolved {
    /// Scalar value, if this is not an artifact
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Artifact(_) => None,
        }
    }

    /// Type name used in mismatch errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Artifact(_) => "artifact",
            Self::Value(v) => v.type_name(),
        }
    }
}

impl std::fmt::Display for Resolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Artifact(a) => write!(f, "{}", a.location),
            Self::Value(v) => write!(f, "{}", v),
        }
    }
}

/// Resolved inputs and hyperparameters of one step execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedInputs {
    pub inputs: BTreeMap<String, Resolved>,
    pub hyperparameters: BTreeMap<String, Resolved>,
}

/// Resolve a property reference against the current run state
pub async fn resolve(
    reference: &PropertyReference,
    state: &RunState,
    store: &dyn ArtifactStore,
) -> Result<Resolved, ResolutionError> {
    let record = state
        .record(&reference.step)
        .ok_or_else(|| ResolutionError::Unresolved {
            step: reference.step.clone(),
            status: "unknown".into(),
        })?;

    if !record.status.is_success() {
        return Err(ResolutionError::Unresolved {
            step: reference.step.clone(),
            status: record.status.to_string(),
        });
    }

    let artifact = record
        .outputs
        .get(&reference.output)
        .ok_or_else(|| ResolutionError::Unresolved {
            step: reference.step.clone(),
            status: format!("{} without output '{}'", record.status, reference.output),
        })?;

    let Some(ref path) = reference.json_path else {
        return Ok(Resolved::Artifact(artifact.clone()));
    };

    if !is_json_content_type(&artifact.content_type) {
        return Err(ResolutionError::TypeMismatch {
            context: reference.to_string(),
            expected: JSON_CONTENT_TYPE.into(),
            found: artifact.content_type.clone(),
        });
    }

    let bytes = store.read(&artifact.location).await?;
    let document: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|e| ResolutionError::MalformedDocument {
            location: artifact.location.clone(),
            message: e.to_string(),
        })?;

    let found = lookup(&document, path).ok_or_else(|| ResolutionError::PathNotFound {
        step: reference.step.clone(),
        output: reference.output.clone(),
        path: path.clone(),
    })?;

    scalar(found, reference).map(Resolved::Value)
}

/// Resolve any input: literals pass through, parameters are looked up in the bound set
pub async fn resolve_input(
    input: &Input,
    state: &RunState,
    store: &dyn ArtifactStore,
    parameters: &BTreeMap<String, Value>,
) -> Result<Resolved, ResolutionError> {
    match input {
        Input::Literal(value) => Ok(Resolved::Value(value.clone())),
        Input::Parameter { parameter } => parameters
            .get(parameter)
            .cloned()
            .map(Resolved::Value)
            .ok_or_else(|| ResolutionError::Unresolved {
                step: parameter.clone(),
                status: "unbound parameter".into(),
            }),
        Input::Reference(reference) => resolve(reference, state, store).await,
    }
}

/// Resolve every input and hyperparameter of a step
pub async fn resolve_step_inputs(
    step: &Step,
    state: &RunState,
    store: &dyn ArtifactStore,
    parameters: &BTreeMap<String, Value>,
) -> Result<ResolvedInputs, ResolutionError> {
    let mut resolved = ResolvedInputs::default();

    for (name, input) in &step.inputs {
        let value = resolve_input(input, state, store, parameters).await?;
        resolved.inputs.insert(name.clone(), value);
    }

    if let Some(hyperparameters) = step.hyperparameters() {
        for (name, input) in hyperparameters {
            let value = resolve_input(input, state, store, parameters).await?;
            resolved.hyperparameters.insert(name.clone(), value);
        }
    }

    Ok(resolved)
}

/// Walk a dotted path; numeric segments index into arrays
fn lookup<'a>(document: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    path.split('.').try_fold(document, |current, segment| match current {
        serde_json::Value::Object(map) => map.get(segment),
        serde_json::Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn scalar(found: &serde_json::Value, reference: &PropertyReference) -> Result<Value, ResolutionError> {
    let mismatch = |kind: &str| ResolutionError::TypeMismatch {
        context: reference.to_string(),
        expected: "number or string".into(),
        found: kind.into(),
    };

    match found {
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(Value::Integer(i)),
            None => n.as_f64().map(Value::Float).ok_or_else(|| mismatch("number")),
        },
        serde_json::Value::String(s) => Ok(Value::String(s.clone())),
        serde_json::Value::Bool(_) => Err(mismatch("boolean")),
        serde_json::Value::Null => Err(mismatch("null")),
        serde_json::Value::Array(_) => Err(mismatch("array")),
        serde_json::Value::Object(_) => Err(mismatch("object")),
    }
}
