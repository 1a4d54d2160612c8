// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Per-step cache decisions
//!
//! Cache failures never fail a step: an unreachable or corrupt store is
//! logged and treated as a miss.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use super::{CacheEntry, CacheStore, SignatureHasher};
use crate::pipeline::{Artifact, ResolvedInputs, Step};
use crate::store::ArtifactStore;

/// Decides whether a step may reuse a prior result
#[derive(Clone)]
pub struct CachingPolicy {
    store: Arc<dyn CacheStore>,
    artifacts: Arc<dyn ArtifactStore>,
    default_ttl: Option<Duration>,
}

impl CachingPolicy {
    /// Create a policy over a cache store
    ///
    /// Cached outputs are checked against `artifacts` before a hit is reported.
    pub fn new(store: Arc<dyn CacheStore>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            artifacts,
            default_ttl: None,
        }
    }

    /// Lifetime for entries of steps without their own `expire_after`
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Cache signature of a step, or `None` when the step is not cacheable
    pub fn signature(&self, step: &Step, resolved: &ResolvedInputs) -> Option<String> {
        if !step.cache.enabled || step.is_condition() {
            return None;
        }

        match SignatureHasher::new().hash_step(step, resolved) {
            Ok(signature) => Some(signature),
            Err(e) => {
                tracing::warn!(step = %step.id, error = %e, "Could not compute cache signature");
                None
            }
        }
    }

    /// Live cache entry for this step execution, if any
    pub async fn should_skip(&self, step: &Step, resolved: &ResolvedInputs) -> Option<CacheEntry> {
        let signature = self.signature(step, resolved)?;

        let entry = match self.store.get(&signature).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                tracing::debug!(step = %step.id, "Cache miss");
                return None;
            }
            Err(e) => {
                tracing::warn!(step = %step.id, error = %e, "Cache lookup failed, treating as miss");
                return None;
            }
        };

        if entry.is_expired(SystemTime::now()) {
            tracing::debug!(step = %step.id, "Cache entry expired");
            self.evict(&step.id, &signature).await;
            return None;
        }

        if !self.outputs_present(step, &entry).await {
            tracing::info!(step = %step.id, "Cached outputs are gone, evicting entry");
            self.evict(&step.id, &signature).await;
            return None;
        }

        tracing::debug!(step = %step.id, signature = %signature, "Cache hit");
        Some(entry)
    }

    /// Record a successful execution
    pub async fn record(&self, step: &Step, resolved: &ResolvedInputs, outputs: &[Artifact]) {
        let Some(signature) = self.signature(step, resolved) else {
            return;
        };

        let ttl = match step.cache.ttl(self.default_ttl) {
            Ok(ttl) => ttl,
            Err(reason) => {
                tracing::warn!(step = %step.id, %reason, "Invalid expire_after, using default");
                self.default_ttl
            }
        };

        let entry = CacheEntry::new(signature, step.id.clone(), outputs.to_vec(), ttl);
        if let Err(e) = self.store.put(&entry).await {
            tracing::warn!(step = %step.id, error = %e, "Failed to write cache entry");
        }
    }

    async fn outputs_present(&self, step: &Step, entry: &CacheEntry) -> bool {
        for declared in &step.outputs {
            let Some(artifact) = entry.outputs.iter().find(|a| a.name == declared.name) else {
                return false;
            };

            match self.artifacts.exists(&artifact.location).await {
                Ok(true) => {}
                Ok(false) => return false,
                Err(e) => {
                    tracing::warn!(step = %step.id, error = %e, "Could not check cached output");
                    return false;
                }
            }
        }

        true
    }

    async fn evict(&self, step_id: &str, signature: &str) {
        if let Err(e) = self.store.invalidate(signature).await {
            tracing::warn!(step = %step_id, error = %e, "Failed to evict cache entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStats, MemoryCache};
    use crate::errors::CacheError;
    use crate::pipeline::{CacheSettings, Resolved, Value};
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct UnreachableCache;

    #[async_trait]
    impl CacheStore for UnreachableCache {
        async fn get(&self, _: &str) -> Result<Option<CacheEntry>, CacheError> {
            Err(CacheError::new("connection refused"))
        }
        async fn put(&self, _: &CacheEntry) -> Result<(), CacheError> {
            Err(CacheError::new("connection refused"))
        }
        async fn invalidate(&self, _: &str) -> Result<(), CacheError> {
            Err(CacheError::new("connection refused"))
        }
        async fn clear(&self) -> Result<(), CacheError> {
            Err(CacheError::new("connection refused"))
        }
        async fn stats(&self) -> Result<CacheStats, CacheError> {
            Err(CacheError::new("connection refused"))
        }
    }

    fn cached_step() -> Step {
        Step::processing("prep", "python prep.py")
            .with_output("data", "text/csv")
            .with_cache(CacheSettings::enabled(Some("1h")))
    }

    fn resolved(value: i64) -> ResolvedInputs {
        let mut resolved = ResolvedInputs::default();
        resolved
            .inputs
            .insert("rows".into(), Resolved::Value(Value::Integer(value)));
        resolved
    }

    fn outputs() -> Vec<Artifact> {
        vec![Artifact::new("data", "runs/r1/prep/data", "text/csv")]
    }

    #[tokio::test]
    async fn test_hit_after_record() {
        let artifacts = Arc::new(MemoryStore::new());
        artifacts.write("runs/r1/prep/data", b"a,b").await.unwrap();
        let policy = CachingPolicy::new(Arc::new(MemoryCache::new()), artifacts);

        let step = cached_step();
        assert!(policy.should_skip(&step, &resolved(1)).await.is_none());

        policy.record(&step, &resolved(1), &outputs()).await;

        let hit = policy.should_skip(&step, &resolved(1)).await.unwrap();
        assert_eq!(hit.outputs, outputs());
        assert_eq!(hit.ttl, Some(Duration::from_secs(3600)));

        assert!(policy.should_skip(&step, &resolved(2)).await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_step_never_hits() {
        let artifacts = Arc::new(MemoryStore::new());
        artifacts.write("runs/r1/prep/data", b"a,b").await.unwrap();
        let policy = CachingPolicy::new(Arc::new(MemoryCache::new()), artifacts);

        let step = cached_step().with_cache(CacheSettings::default());
        policy.record(&step, &resolved(1), &outputs()).await;

        assert!(policy.signature(&step, &resolved(1)).is_none());
        assert!(policy.should_skip(&step, &resolved(1)).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent() {
        let cache = Arc::new(MemoryCache::new());
        let artifacts = Arc::new(MemoryStore::new());
        artifacts.write("runs/r1/prep/data", b"a,b").await.unwrap();
        let policy = CachingPolicy::new(cache.clone(), artifacts);

        let step = cached_step();
        let signature = policy.signature(&step, &resolved(1)).unwrap();
        let mut entry = CacheEntry::new(signature.clone(), "prep", outputs(), Some(Duration::from_secs(60)));
        entry.created_at = SystemTime::now() - Duration::from_secs(120);
        cache.put(&entry).await.unwrap();

        assert!(policy.should_skip(&step, &resolved(1)).await.is_none());
        assert!(cache.get(&signature).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_outputs_evict_entry() {
        let cache = Arc::new(MemoryCache::new());
        let policy = CachingPolicy::new(cache.clone(), Arc::new(MemoryStore::new()));

        let step = cached_step();
        policy.record(&step, &resolved(1), &outputs()).await;

        assert!(policy.should_skip(&step, &resolved(1)).await.is_none());
        assert_eq!(cache.stats().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn test_unreachable_store_is_a_miss() {
        let policy = CachingPolicy::new(Arc::new(UnreachableCache), Arc::new(MemoryStore::new()));

        let step = cached_step();
        policy.record(&step, &resolved(1), &outputs()).await;
        assert!(policy.should_skip(&step, &resolved(1)).await.is_none());
    }
}
