// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! In-memory artifact store

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{check_location, ArtifactStore};
use crate::errors::StoreError;

/// Process-local artifact store
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove a location; returns whether it existed
    pub async fn remove(&self, location: &str) -> bool {
        self.objects.write().await.remove(location).is_some()
    }

    /// Stored locations, sorted
    pub async fn locations(&self) -> Vec<String> {
        let mut locations: Vec<String> = self.objects.read().await.keys().cloned().collect();
        locations.sort();
        locations
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn read(&self, location: &str) -> Result<Vec<u8>, StoreError> {
        self.objects
            .read()
            .await
            .get(location)
            .cloned()
            .ok_or_else(|| StoreError::new(location, "no artifact at this location"))
    }

    async fn write(&self, location: &str, data: &[u8]) -> Result<String, StoreError> {
        check_location(location)?;
        self.objects
            .write()
            .await
            .insert(location.to_string(), data.to_vec());
        Ok(location.to_string())
    }

    async fn exists(&self, location: &str) -> Result<bool, StoreError> {
        Ok(self.objects.read().await.contains_key(location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();

        store.write("runs/r1/a/out", b"hello").await.unwrap();
        assert_eq!(store.read_string("runs/r1/a/out").await.unwrap(), "hello");
        assert_eq!(store.locations().await, vec!["runs/r1/a/out"]);

        assert!(store.remove("runs/r1/a/out").await);
        assert!(!store.exists("runs/r1/a/out").await.unwrap());
        assert!(store.read("runs/r1/a/out").await.is_err());
    }
}
