// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! In-memory cache, used by tests and one-off runs

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{CacheEntry, CacheStats, CacheStore};
use crate::errors::CacheError;

/// Process-local cache store
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, signature: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.read().await.get(signature).cloned())
    }

    async fn put(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        self.entries
            .write()
            .await
            .insert(entry.signature.clone(), entry.clone());
        Ok(())
    }

    async fn invalidate(&self, signature: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(signature);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.write().await.clear();
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let entries = self.entries.read().await;
        Ok(CacheStats::from_entries(entries.values()))
    }
}
