// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Filesystem artifact store rooted at the workspace directory

use async_trait::async_trait;
use std::path::PathBuf;

use super::{check_location, ArtifactStore};
use crate::errors::StoreError;

/// Artifact store backed by a local directory
#[derive(Debug, Clone)]
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    /// Create a store rooted at `root` (created on first write)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Filesystem path of a location
    pub fn path(&self, location: &str) -> Result<PathBuf, StoreError> {
        check_location(location)?;
        Ok(self.root.join(location))
    }
}

#[async_trait]
impl ArtifactStore for FilesystemStore {
    async fn read(&self, location: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path(location)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| StoreError::new(location, e.to_string()))
    }

    async fn write(&self, location: &str, data: &[u8]) -> Result<String, StoreError> {
        let path = self.path(location)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::new(location, e.to_string()))?;
        }

        tokio::fs::write(&path, data)
            .await
            .map_err(|e| StoreError::new(location, e.to_string()))?;

        Ok(location.to_string())
    }

    async fn exists(&self, location: &str) -> Result<bool, StoreError> {
        let path = self.path(location)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StoreError::new(location, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_then_read() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp_dir.path());

        let location = store
            .write("runs/r1/eval/evaluation", br#"{"metrics":{}}"#)
            .await
            .unwrap();

        assert_eq!(location, "runs/r1/eval/evaluation");
        assert!(store.exists(&location).await.unwrap());
        assert_eq!(store.read_string(&location).await.unwrap(), r#"{"metrics":{}}"#);
        assert!(temp_dir.path().join("runs/r1/eval/evaluation").exists());
    }

    #[tokio::test]
    async fn test_missing_location() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp_dir.path());

        assert!(!store.exists("runs/r1/nothing").await.unwrap());
        let err = store.read("runs/r1/nothing").await.unwrap_err();
        assert_eq!(err.location, "runs/r1/nothing");
    }

    #[tokio::test]
    async fn test_rejects_escaping_locations() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp_dir.path());

        assert!(store.write("../outside", b"x").await.is_err());
    }
}
