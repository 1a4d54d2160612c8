// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Pipeline assembly
//!
//! A [`Pipeline`] is an immutable, fully checked definition: names are
//! valid, parameters are well typed, every reference resolves to a visible
//! step output and the step graph is acyclic. Building has no side effects.

use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use super::dag::DagBuilder;
use super::{Parameter, PipelineDefinition, Step, Value};
use crate::errors::{BuildError, TrainflowError, TrainflowResult};

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("name pattern compiles"))
}

/// Whether a pipeline name or step id is well formed
pub fn is_valid_name(name: &str) -> bool {
    name_pattern().is_match(name)
}

/// A validated pipeline
#[derive(Debug, Clone)]
pub struct Pipeline {
    definition: PipelineDefinition,
    dag: DagBuilder,
}

impl Pipeline {
    /// Build a pipeline from its parts
    pub fn build(
        name: impl Into<String>,
        parameters: Vec<Parameter>,
        steps: Vec<Step>,
    ) -> Result<Self, BuildError> {
        let mut definition = PipelineDefinition::new(name);
        definition.parameters = parameters;
        definition.steps = steps;
        Self::from_definition(definition)
    }

    /// Validate a parsed definition
    pub fn from_definition(mut definition: PipelineDefinition) -> Result<Self, BuildError> {
        if !is_valid_name(&definition.name) {
            return Err(BuildError::InvalidName {
                name: definition.name.clone(),
            });
        }

        check_parameters(&mut definition.parameters)?;

        let declared: HashSet<&str> = definition.parameters.iter().map(|p| p.name.as_str()).collect();
        check_steps(&definition.steps, &declared)?;

        let dag = DagBuilder::build(&definition)?;

        tracing::debug!(
            pipeline = %definition.name,
            steps = dag.nodes().len(),
            "Pipeline built"
        );

        Ok(Self { definition, dag })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.definition.parameters
    }

    pub fn dag(&self) -> &DagBuilder {
        &self.dag
    }

    /// Look up any step, including steps inside condition branches
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.dag.step(id)
    }

    /// Deterministic execution order of every step
    pub fn topological_order(&self) -> Vec<String> {
        self.dag.topological_order()
    }

    /// Serialized definition
    pub fn to_json(&self) -> TrainflowResult<String> {
        self.definition.to_json()
    }

    /// Run plan persisted at the start of a run: definition plus execution order
    pub fn plan_json(&self) -> TrainflowResult<String> {
        #[derive(Serialize)]
        struct RunPlan<'a> {
            definition: &'a PipelineDefinition,
            order: Vec<String>,
        }

        let plan = RunPlan {
            definition: &self.definition,
            order: self.topological_order(),
        };
        serde_json::to_string_pretty(&plan).map_err(Into::into)
    }

    /// Parameter values for one run: defaults overridden by `NAME=VALUE` pairs
    pub fn bind_parameters(&self, overrides: &[String]) -> TrainflowResult<BTreeMap<String, Value>> {
        let mut bound: BTreeMap<String, Value> = self
            .definition
            .parameters
            .iter()
            .map(|p| (p.name.clone(), p.default.clone()))
            .collect();

        for raw in overrides {
            let invalid = |reason: String| TrainflowError::InvalidOverride {
                raw: raw.clone(),
                reason,
            };

            let (name, value) = raw
                .split_once('=')
                .ok_or_else(|| invalid("expected NAME=VALUE".into()))?;

            let parameter = self
                .definition
                .get_parameter(name.trim())
                .ok_or_else(|| invalid(format!("unknown parameter '{}'", name.trim())))?;

            let value = parameter.param_type.parse(value).map_err(invalid)?;
            bound.insert(parameter.name.clone(), value);
        }

        Ok(bound)
    }
}

fn check_parameters(parameters: &mut [Parameter]) -> Result<(), BuildError> {
    let mut seen = HashSet::new();

    for parameter in parameters.iter_mut() {
        if !is_valid_name(&parameter.name) {
            return Err(BuildError::InvalidName {
                name: parameter.name.clone(),
            });
        }

        if !seen.insert(parameter.name.clone()) {
            return Err(BuildError::InvalidParameter {
                name: parameter.name.clone(),
                reason: "declared more than once".into(),
            });
        }

        parameter.default = parameter
            .param_type
            .coerce(&parameter.default)
            .ok_or_else(|| BuildError::InvalidParameter {
                name: parameter.name.clone(),
                reason: format!(
                    "default {} is a {}, expected {}",
                    parameter.default,
                    parameter.default.type_name(),
                    parameter.param_type
                ),
            })?;
    }

    Ok(())
}

fn check_steps(steps: &[Step], parameters: &HashSet<&str>) -> Result<(), BuildError> {
    for step in steps {
        if !is_valid_name(&step.id) {
            return Err(BuildError::InvalidName {
                name: step.id.clone(),
            });
        }

        let invalid = |reason: String| BuildError::InvalidStep {
            step: step.id.clone(),
            reason,
        };

        for input in step.consumed() {
            if let Some(name) = input.parameter_name() {
                if !parameters.contains(name) {
                    return Err(BuildError::UnknownParameter {
                        step: step.id.clone(),
                        parameter: name.to_string(),
                    });
                }
            }
        }

        let mut outputs = HashSet::new();
        for output in &step.outputs {
            if !is_valid_name(&output.name) {
                return Err(BuildError::InvalidName {
                    name: output.name.clone(),
                });
            }
            if !outputs.insert(output.name.as_str()) {
                return Err(invalid(format!("output '{}' is declared more than once", output.name)));
            }
        }

        step.cache.ttl(None).map_err(|reason| invalid(format!("cache: {}", reason)))?;

        if let Some(program) = step.program() {
            if program.command.trim().is_empty() {
                return Err(invalid("program command is empty".into()));
            }
        }

        if let Some(conditions) = step.conditions() {
            if conditions.is_empty() {
                return Err(invalid("condition step has no conditions".into()));
            }
            if !step.outputs.is_empty() {
                return Err(invalid("condition steps cannot declare outputs".into()));
            }
            if step.cache.enabled {
                return Err(invalid("condition steps cannot be cached".into()));
            }
        }

        if let Some((if_steps, else_steps)) = step.branches() {
            check_steps(if_steps, parameters)?;
            check_steps(else_steps, parameters)?;
        }
    }

    Ok(())
}

/// Fluent builder for pipelines defined in code
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    definition: PipelineDefinition,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            definition: PipelineDefinition::new(name),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.definition.description = Some(description.into());
        self
    }

    pub fn parameter(mut self, parameter: Parameter) -> Self {
        self.definition.parameters.push(parameter);
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.definition.steps.push(step);
        self
    }

    pub fn build(self) -> Result<Pipeline, BuildError> {
        Pipeline::from_definition(self.definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{CacheSettings, Condition, Input, Operator};

    fn eval_step() -> Step {
        Step::processing("eval", "python eval.py").with_output("evaluation", "application/json")
    }

    #[test]
    fn test_builder_builds_valid_pipeline() {
        let pipeline = PipelineBuilder::new("training")
            .description("train and gate")
            .parameter(Parameter::float("threshold", 0.1))
            .step(eval_step())
            .step(Step::condition(
                "check",
                vec![Condition::new(
                    Input::json("eval", "evaluation", "metrics.accuracy.value"),
                    Operator::GreaterThanOrEqual,
                    Input::parameter("threshold"),
                )],
                vec![Step::processing("approve", "true")],
                vec![],
            ))
            .build()
            .unwrap();

        assert_eq!(pipeline.name(), "training");
        assert_eq!(pipeline.topological_order(), vec!["eval", "check", "approve"]);
        assert!(pipeline.step("approve").is_some());
    }

    #[test]
    fn test_invalid_step_id() {
        let err = Pipeline::build("p", vec![], vec![Step::processing("bad id", "true")]).unwrap_err();
        assert_eq!(err, BuildError::InvalidName { name: "bad id".into() });
    }

    #[test]
    fn test_output_names_are_path_segments() {
        for name in ["../../escape/x", "a/b", ".hidden", ""] {
            let step = Step::processing("a", "true").with_output(name, "text/plain");
            let err = Pipeline::build("p", vec![], vec![step]).unwrap_err();
            assert_eq!(err, BuildError::InvalidName { name: name.into() });
        }
    }

    #[test]
    fn test_oversized_cache_ttl_is_rejected() {
        let step = Step::processing("a", "true")
            .with_output("out", "text/plain")
            .with_cache(CacheSettings::enabled(Some("99999999999999999w")));
        assert!(matches!(
            Pipeline::build("p", vec![], vec![step]),
            Err(BuildError::InvalidStep { ref reason, .. }) if reason.contains("too long")
        ));
    }

    #[test]
    fn test_unknown_parameter() {
        let step = Step::processing("a", "true").with_input("x", Input::parameter("missing"));
        let err = Pipeline::build("p", vec![], vec![step]).unwrap_err();
        assert!(matches!(err, BuildError::UnknownParameter { ref parameter, .. } if parameter == "missing"));
    }

    #[test]
    fn test_parameter_default_is_checked_and_widened() {
        let mut parameter = Parameter::integer("lr", 1);
        parameter.param_type = crate::pipeline::ParameterType::Float;
        let pipeline = Pipeline::build("p", vec![parameter], vec![]).unwrap();
        assert_eq!(pipeline.parameters()[0].default, Value::Float(1.0));

        let mut parameter = Parameter::string("epochs", "ten");
        parameter.param_type = crate::pipeline::ParameterType::Integer;
        assert!(matches!(
            Pipeline::build("p", vec![parameter], vec![]),
            Err(BuildError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_condition_step_rules() {
        let no_conditions = Step::condition("check", vec![], vec![], vec![]);
        assert!(matches!(
            Pipeline::build("p", vec![], vec![no_conditions]),
            Err(BuildError::InvalidStep { .. })
        ));

        let cached = Step::processing("a", "true").with_cache(CacheSettings::enabled(Some("soon")));
        assert!(matches!(
            Pipeline::build("p", vec![], vec![cached]),
            Err(BuildError::InvalidStep { .. })
        ));
    }

    #[test]
    fn test_bind_parameters() {
        let pipeline = Pipeline::build(
            "p",
            vec![Parameter::integer("epochs", 1), Parameter::float("lr", 0.01)],
            vec![],
        )
        .unwrap();

        let bound = pipeline.bind_parameters(&["epochs=5".into()]).unwrap();
        assert_eq!(bound["epochs"], Value::Integer(5));
        assert_eq!(bound["lr"], Value::Float(0.01));

        for bad in ["epochs", "batch=3", "epochs=five"] {
            assert!(matches!(
                pipeline.bind_parameters(&[bad.to_string()]),
                Err(TrainflowError::InvalidOverride { .. })
            ));
        }
    }

    #[test]
    fn test_build_error_registers_nothing() {
        let steps = vec![
            Step::processing("a", "true").with_input("x", Input::output("b", "out")).with_output("out", "text/plain"),
            Step::processing("b", "true").with_input("x", Input::output("a", "out")).with_output("out", "text/plain"),
        ];
        assert!(matches!(
            Pipeline::build("p", vec![], steps),
            Err(BuildError::Cycle { .. })
        ));
    }
}
