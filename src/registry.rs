// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Pipeline registry
//!
//! Registered definitions live in the artifact store at
//! `pipelines/<name>.json`. Registration is idempotent: registering the same
//! definition twice leaves the stored document untouched.

use std::sync::Arc;

use crate::errors::{StoreError, TrainflowError, TrainflowResult};
use crate::pipeline::{Pipeline, PipelineDefinition};
use crate::store::ArtifactStore;

/// Outcome of registering a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Created,
    Updated,
    Unchanged,
}

impl std::fmt::Display for RegisterOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Named pipeline definitions kept in an artifact store
pub struct PipelineRegistry {
    store: Arc<dyn ArtifactStore>,
}

impl PipelineRegistry {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    /// Store location of a pipeline definition
    pub fn location(name: &str) -> String {
        format!("pipelines/{}.json", name)
    }

    /// Register (or update) a built pipeline
    pub async fn register(&self, pipeline: &Pipeline) -> TrainflowResult<RegisterOutcome> {
        let location = Self::location(pipeline.name());
        let document = pipeline.to_json()?;

        let outcome = if self.store.exists(&location).await? {
            let stored = self.store.read_string(&location).await?;
            if stored == document {
                return Ok(RegisterOutcome::Unchanged);
            }
            RegisterOutcome::Updated
        } else {
            RegisterOutcome::Created
        };

        self.store.write(&location, document.as_bytes()).await?;

        tracing::info!(pipeline = %pipeline.name(), %outcome, "Pipeline registered");
        Ok(outcome)
    }

    /// Load and rebuild a registered pipeline
    pub async fn load(&self, name: &str) -> TrainflowResult<Pipeline> {
        let location = Self::location(name);

        if !self.store.exists(&location).await? {
            return Err(TrainflowError::PipelineNotRegistered {
                name: name.to_string(),
            });
        }

        let document = self.store.read_string(&location).await?;
        let definition = PipelineDefinition::from_json(&document).map_err(|e| {
            TrainflowError::Store(StoreError::new(&location, format!("stored definition is invalid: {}", e)))
        })?;

        Ok(Pipeline::from_definition(definition)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Parameter, PipelineBuilder, Step};
    use crate::store::MemoryStore;

    fn pipeline(epochs: i64) -> Pipeline {
        PipelineBuilder::new("training")
            .parameter(Parameter::integer("epochs", epochs))
            .step(Step::processing("prep", "true").with_output("data", "text/csv"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let registry = PipelineRegistry::new(Arc::new(MemoryStore::new()));

        assert_eq!(registry.register(&pipeline(1)).await.unwrap(), RegisterOutcome::Created);
        assert_eq!(registry.register(&pipeline(1)).await.unwrap(), RegisterOutcome::Unchanged);
        assert_eq!(registry.register(&pipeline(2)).await.unwrap(), RegisterOutcome::Updated);
    }

    #[tokio::test]
    async fn test_load_round_trips() {
        let registry = PipelineRegistry::new(Arc::new(MemoryStore::new()));
        let original = pipeline(3);
        registry.register(&original).await.unwrap();

        let loaded = registry.load("training").await.unwrap();
        assert_eq!(loaded.definition(), original.definition());
        assert_eq!(loaded.topological_order(), vec!["prep"]);
    }

    #[tokio::test]
    async fn test_load_unknown_pipeline() {
        let registry = PipelineRegistry::new(Arc::new(MemoryStore::new()));
        assert!(matches!(
            registry.load("missing").await,
            Err(TrainflowError::PipelineNotRegistered { .. })
        ));
    }
}
