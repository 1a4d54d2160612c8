// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Error recovery suggestions
//!
//! Provides actionable suggestions for recovering from errors.

/// A recovery suggestion with concrete steps
#[derive(Debug, Clone)]
pub struct RecoverySuggestion {
    /// Brief description of what to do
    pub action: String,
    /// Detailed steps
    pub steps: Vec<String>,
    /// Commands to run
    pub commands: Vec<String>,
}

impl RecoverySuggestion {
    /// Suggest breaking a dependency cycle
    pub fn fix_cycle(steps: &[String]) -> Self {
        Self {
            action: "Remove the dependency cycle".into(),
            steps: vec![
                format!("Detected cycle: {}", steps.join(" → ")),
                "A step can only consume outputs of steps that finish before it".into(),
                "Remove one property reference or depends_on entry in the cycle".into(),
            ],
            commands: vec![
                "# Visualize the step graph:".into(),
                "trainflow graph <definition> --format mermaid".into(),
            ],
        }
    }

    /// Suggest fixing a reference to a missing step or output
    pub fn fix_dangling_reference(step: &str, target: &str) -> Self {
        Self {
            action: format!("Fix the reference from '{}' to '{}'", step, target),
            steps: vec![
                "The referenced step must exist and declare the referenced output".into(),
                "Steps inside a condition branch are only visible within that branch".into(),
                "Branch steps may use enclosing steps declared before the condition".into(),
            ],
            commands: vec![
                "# Show every step and its outputs:".into(),
                "trainflow validate <definition> --verbose".into(),
            ],
        }
    }

    /// Suggest registering a pipeline before running it
    pub fn register_pipeline(name: &str) -> Self {
        Self {
            action: format!("Register pipeline '{}'", name),
            steps: vec![
                "Pipelines are run by name from the registry".into(),
                "Create (or update) the registered definition first".into(),
            ],
            commands: vec![
                "# Register the definition:".into(),
                "trainflow create pipeline.yaml".into(),
                "".into(),
                "# Then run it:".into(),
                format!("trainflow run {}", name),
            ],
        }
    }
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "→ {}", self.action)?;

        for step in &self.steps {
            writeln!(f, "  {}", step)?;
        }

        if !self.commands.is_empty() {
            writeln!(f)?;
            for cmd in &self.commands {
                writeln!(f, "  {}", cmd)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_suggestion_display() {
        let suggestion = RecoverySuggestion::fix_cycle(&["train".into(), "eval".into()]);
        let text = suggestion.to_string();
        assert!(text.starts_with("→ Remove the dependency cycle"));
        assert!(text.contains("train → eval"));
    }
}
