// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Artifact storage
//!
//! Artifacts are addressed by caller-supplied relative locations such as
//! `runs/<run_id>/<step_id>/<output>`, not by content hash.

mod filesystem;
mod memory;

pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::errors::StoreError;

/// Trait for artifact store implementations
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Read the bytes stored at a location
    async fn read(&self, location: &str) -> Result<Vec<u8>, StoreError>;

    /// Write bytes to a location, returning the location
    async fn write(&self, location: &str, data: &[u8]) -> Result<String, StoreError>;

    /// Check whether a location holds an artifact
    async fn exists(&self, location: &str) -> Result<bool, StoreError>;

    /// Read a location as UTF-8 text
    async fn read_string(&self, location: &str) -> Result<String, StoreError> {
        let bytes = self.read(location).await?;
        String::from_utf8(bytes).map_err(|e| StoreError::new(location, e.to_string()))
    }
}

/// Location of a step output within a run
pub fn output_location(run_id: &str, step_id: &str, output: &str) -> String {
    format!("runs/{}/{}/{}", run_id, step_id, output)
}

/// Location of a run's persisted plan
pub fn plan_location(run_id: &str) -> String {
    format!("runs/{}/plan.json", run_id)
}

/// Location of a run's report
pub fn report_location(run_id: &str) -> String {
    format!("runs/{}/report.json", run_id)
}

/// Reject absolute locations and parent-directory escapes
pub(crate) fn check_location(location: &str) -> Result<(), StoreError> {
    if location.is_empty() {
        return Err(StoreError::new(location, "location is empty"));
    }

    if location.starts_with('/') || location.split('/').any(|part| part == "..") {
        return Err(StoreError::new(location, "location must be relative and stay inside the store"));
    }

    Ok(())
}
