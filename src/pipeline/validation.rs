// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Pipeline validation
//!
//! Checks a definition without running it. Anything that would stop the
//! pipeline from building is an error; suspicious but buildable setups are
//! reported as warnings.

use std::collections::{HashMap, HashSet};

use super::{Pipeline, PipelineDefinition, Step};

/// Pipeline validator
pub struct PipelineValidator;

impl PipelineValidator {
    /// Validate a pipeline definition
    pub fn validate(definition: &PipelineDefinition) -> ValidationResult {
        let mut result = ValidationResult::new();

        if let Err(e) = Pipeline::from_definition(definition.clone()) {
            result.add_error(&e.to_string());
        }

        if definition.steps.is_empty() {
            result.add_warning("Pipeline has no steps defined");
        }

        let mut steps = Vec::new();
        flatten(&definition.steps, &mut steps);

        let by_id: HashMap<&str, &Step> = steps.iter().map(|s| (s.id.as_str(), *s)).collect();

        let mut consumed = HashSet::new();
        for step in &steps {
            for reference in step.references() {
                consumed.insert((reference.step.as_str(), reference.output.as_str()));

                let Some(path) = reference.json_path.as_deref() else {
                    continue;
                };
                let output = by_id
                    .get(reference.step.as_str())
                    .and_then(|target| target.output(&reference.output));
                if let Some(output) = output {
                    if !output.is_json() {
                        result.add_warning(&format!(
                            "Step '{}': path '{}' is read from '{}.{}', which is declared as {}",
                            step.id, path, reference.step, reference.output, output.content_type
                        ));
                    }
                }
            }
        }

        for step in &steps {
            Self::validate_step(step, &consumed, &mut result);
        }

        result
    }

    fn validate_step(step: &Step, consumed: &HashSet<(&str, &str)>, result: &mut ValidationResult) {
        if let Some((if_steps, else_steps)) = step.branches() {
            if if_steps.is_empty() && else_steps.is_empty() {
                result.add_warning(&format!(
                    "Step '{}': both branches are empty, the condition has no effect",
                    step.id
                ));
            }
        }

        if step.cache.enabled {
            if let Some(program) = step.program() {
                if program.code_version.is_none() {
                    result.add_warning(&format!(
                        "Step '{}': caching is enabled but the program has no code_version; \
                         edits to the code behind the command will not invalidate the cache",
                        step.id
                    ));
                }
            }
        }

        for output in &step.outputs {
            if !consumed.contains(&(step.id.as_str(), output.name.as_str())) {
                result.add_info(&format!(
                    "Step '{}': output '{}' is not consumed by any step",
                    step.id, output.name
                ));
            }
        }
    }
}

fn flatten<'a>(steps: &'a [Step], out: &mut Vec<&'a Step>) {
    for step in steps {
        out.push(step);
        if let Some((if_steps, else_steps)) = step.branches() {
            flatten(if_steps, out);
            flatten(else_steps, out);
        }
    }
}

/// Result of pipeline validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Informational notes, never a reason to fail
    pub info: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    pub fn add_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    pub fn add_info(&mut self, message: &str) {
        self.info.push(message.to_string());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{CacheSettings, Condition, Input, Operator, Program};

    fn definition(steps: Vec<Step>) -> PipelineDefinition {
        let mut definition = PipelineDefinition::new("training");
        definition.steps = steps;
        definition
    }

    #[test]
    fn test_empty_pipeline_is_valid_with_warning() {
        let result = PipelineValidator::validate(&definition(vec![]));
        assert!(result.is_valid());
        assert!(result.warnings[0].contains("no steps"));
    }

    #[test]
    fn test_build_errors_are_reported() {
        let result = PipelineValidator::validate(&definition(vec![
            Step::processing("a", "true"),
            Step::processing("a", "true"),
        ]));
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("more than once"));
    }

    #[test]
    fn test_json_path_on_non_json_output() {
        let result = PipelineValidator::validate(&definition(vec![
            Step::processing("eval", "true").with_output("report", "text/plain"),
            Step::processing("use", "true").with_input("acc", Input::json("eval", "report", "accuracy")),
        ]));
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.contains("text/plain")));
    }

    #[test]
    fn test_empty_branches_and_unversioned_cache() {
        let check = Step::condition(
            "check",
            vec![Condition::new(Input::from(1.0), Operator::GreaterThan, Input::from(0.5))],
            vec![],
            vec![],
        );
        let cached = Step::processing("prep", "true").with_cache(CacheSettings::enabled(None));

        let result = PipelineValidator::validate(&definition(vec![check, cached]));
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.contains("both branches are empty")));
        assert!(result.warnings.iter().any(|w| w.contains("code_version")));

        let versioned = Step::processing("prep", "true")
            .with_program(Program::shell("true").with_code_version("v1"))
            .with_cache(CacheSettings::enabled(None));
        let result = PipelineValidator::validate(&definition(vec![versioned]));
        assert!(!result.has_warnings());
    }

    #[test]
    fn test_unconsumed_outputs_are_informational() {
        let result = PipelineValidator::validate(&definition(vec![
            Step::processing("prep", "true").with_output("data", "text/csv"),
        ]));
        assert!(result.is_valid());
        assert!(!result.has_warnings());
        assert_eq!(result.info.len(), 1);
    }
}
