// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Filesystem-based cache implementation
//!
//! Stores cache entries as JSON files in a cache directory, sharded by the
//! first two characters of the signature.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{CacheEntry, CacheStats, CacheStore};
use crate::errors::CacheError;

/// Filesystem-based cache
pub struct FilesystemCache {
    /// Cache directory
    cache_dir: PathBuf,
}

impl FilesystemCache {
    /// Create a new filesystem cache
    pub fn new(cache_dir: PathBuf) -> Result<Self, CacheError> {
        if !cache_dir.exists() {
            std::fs::create_dir_all(&cache_dir).map_err(|e| {
                CacheError::new(format!("Failed to create cache directory: {}", e))
            })?;
        }

        Ok(Self { cache_dir })
    }

    /// Get path for a cache entry
    fn cache_path(&self, signature: &str) -> PathBuf {
        let (prefix, rest) = signature.split_at(2.min(signature.len()));
        self.cache_dir.join(prefix).join(format!("{}.json", rest))
    }

    /// List all readable cache entries
    fn list_entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let mut entries = Vec::new();

        if !self.cache_dir.exists() {
            return Ok(entries);
        }

        let read_dir = |path: &Path| {
            std::fs::read_dir(path)
                .map_err(|e| CacheError::new(format!("Failed to read cache directory: {}", e)))
        };

        for prefix_dir in read_dir(&self.cache_dir)? {
            let prefix_dir = prefix_dir
                .map_err(|e| CacheError::new(format!("Failed to read cache entry: {}", e)))?
                .path();

            if !prefix_dir.is_dir() {
                continue;
            }

            for entry_file in read_dir(&prefix_dir)? {
                let entry_file = entry_file
                    .map_err(|e| CacheError::new(format!("Failed to read cache file: {}", e)))?
                    .path();

                if entry_file.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }

                // Unparseable files are skipped; `get` evicts them on access
                if let Ok(content) = std::fs::read_to_string(&entry_file) {
                    if let Ok(entry) = serde_json::from_str::<CacheEntry>(&content) {
                        entries.push(entry);
                    }
                }
            }
        }

        Ok(entries)
    }

    /// Calculate directory size recursively
    fn dir_size(path: &Path) -> Result<u64, CacheError> {
        let mut size = 0;

        for entry in std::fs::read_dir(path)
            .map_err(|e| CacheError::new(format!("Failed to read directory: {}", e)))?
        {
            let entry =
                entry.map_err(|e| CacheError::new(format!("Failed to read entry: {}", e)))?;

            let path = entry.path();
            if path.is_dir() {
                size += Self::dir_size(&path)?;
            } else {
                size += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }

        Ok(size)
    }
}

#[async_trait]
impl CacheStore for FilesystemCache {
    async fn get(&self, signature: &str) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.cache_path(signature);

        if !path.exists() {
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| CacheError::new(format!("Failed to read cache entry: {}", e)))?;

        match serde_json::from_str::<CacheEntry>(&content) {
            Ok(entry) if entry.signature == signature => Ok(Some(entry)),
            _ => {
                tracing::warn!(path = %path.display(), "Discarding corrupt cache entry");
                let _ = tokio::fs::remove_file(&path).await;
                Ok(None)
            }
        }
    }

    async fn put(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let path = self.cache_path(&entry.signature);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CacheError::new(format!("Failed to create cache directory: {}", e)))?;
        }

        let json = serde_json::to_string_pretty(entry)
            .map_err(|e| CacheError::new(format!("Failed to serialize cache entry: {}", e)))?;

        tokio::fs::write(&path, json)
            .await
            .map_err(|e| CacheError::new(format!("Failed to write cache entry: {}", e)))
    }

    async fn invalidate(&self, signature: &str) -> Result<(), CacheError> {
        let path = self.cache_path(signature);

        if path.exists() {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| CacheError::new(format!("Failed to remove cache entry: {}", e)))?;
        }

        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        if self.cache_dir.exists() {
            tokio::fs::remove_dir_all(&self.cache_dir)
                .await
                .map_err(|e| CacheError::new(format!("Failed to clear cache: {}", e)))?;

            tokio::fs::create_dir_all(&self.cache_dir)
                .await
                .map_err(|e| CacheError::new(format!("Failed to recreate cache directory: {}", e)))?;
        }

        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let entries = self.list_entries()?;
        let mut stats = CacheStats::from_entries(&entries);

        if self.cache_dir.exists() {
            stats.size_bytes = Self::dir_size(&self.cache_dir)?;
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Artifact;
    use tempfile::TempDir;

    fn make_entry(signature: &str) -> CacheEntry {
        CacheEntry::new(
            signature,
            "train",
            vec![Artifact::new("model", "runs/r1/train/model", "application/x-tar")],
            None,
        )
    }

    #[tokio::test]
    async fn test_cache_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let cache = FilesystemCache::new(temp_dir.path().to_path_buf()).unwrap();

        let entry = make_entry("abcdef");
        cache.put(&entry).await.unwrap();

        assert!(temp_dir.path().join("ab").join("cdef.json").exists());
        assert_eq!(cache.get("abcdef").await.unwrap(), Some(entry));
        assert_eq!(cache.get("abcdeg").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cache_invalidate() {
        let temp_dir = TempDir::new().unwrap();
        let cache = FilesystemCache::new(temp_dir.path().to_path_buf()).unwrap();

        cache.put(&make_entry("abcdef")).await.unwrap();
        assert!(cache.get("abcdef").await.unwrap().is_some());

        cache.invalidate("abcdef").await.unwrap();
        assert!(cache.get("abcdef").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let temp_dir = TempDir::new().unwrap();
        let cache = FilesystemCache::new(temp_dir.path().to_path_buf()).unwrap();

        std::fs::create_dir_all(temp_dir.path().join("ab")).unwrap();
        std::fs::write(temp_dir.path().join("ab").join("cdef.json"), "{not json").unwrap();

        assert!(cache.get("abcdef").await.unwrap().is_none());
        assert!(!temp_dir.path().join("ab").join("cdef.json").exists());
    }

    #[tokio::test]
    async fn test_cache_clear() {
        let temp_dir = TempDir::new().unwrap();
        let cache = FilesystemCache::new(temp_dir.path().to_path_buf()).unwrap();

        cache.put(&make_entry("abcdef")).await.unwrap();
        cache.put(&make_entry("123456")).await.unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.entries, 2);
        assert!(stats.size_bytes > 0);

        cache.clear().await.unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.entries, 0);
    }
}
