// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Caching layer for step results
//!
//! A step whose signature matches a live entry is skipped and reuses the
//! entry's output locations instead of being submitted again.

mod filesystem;
mod hash;
mod memory;
mod policy;

pub use filesystem::FilesystemCache;
pub use hash::{hash_string, SignatureHasher};
pub use memory::MemoryCache;
pub use policy::CachingPolicy;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

use crate::errors::CacheError;
use crate::pipeline::Artifact;

/// Trait for cache store implementations
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up an entry by signature
    async fn get(&self, signature: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Store an entry, replacing any entry with the same signature
    async fn put(&self, entry: &CacheEntry) -> Result<(), CacheError>;

    /// Remove the entry for a signature
    async fn invalidate(&self, signature: &str) -> Result<(), CacheError>;

    /// Clear all cached entries
    async fn clear(&self) -> Result<(), CacheError>;

    /// Get cache statistics
    async fn stats(&self) -> Result<CacheStats, CacheError>;
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of cached entries
    pub entries: usize,
    /// Entries whose lifetime has elapsed
    pub expired: usize,
    /// Total size in bytes
    pub size_bytes: u64,
    /// Oldest entry timestamp
    pub oldest_entry: Option<SystemTime>,
    /// Newest entry timestamp
    pub newest_entry: Option<SystemTime>,
}

impl CacheStats {
    /// Build statistics from a set of entries
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a CacheEntry>) -> Self {
        let now = SystemTime::now();
        let mut stats = Self::default();

        for entry in entries {
            stats.entries += 1;
            if entry.is_expired(now) {
                stats.expired += 1;
            }
            stats.oldest_entry = Some(match stats.oldest_entry {
                Some(oldest) if oldest <= entry.created_at => oldest,
                _ => entry.created_at,
            });
            stats.newest_entry = Some(match stats.newest_entry {
                Some(newest) if newest >= entry.created_at => newest,
                _ => entry.created_at,
            });
        }

        stats
    }

    /// Format size for display
    pub fn formatted_size(&self) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;

        if self.size_bytes >= GB {
            format!("{:.2} GB", self.size_bytes as f64 / GB as f64)
        } else if self.size_bytes >= MB {
            format!("{:.2} MB", self.size_bytes as f64 / MB as f64)
        } else if self.size_bytes >= KB {
            format!("{:.2} KB", self.size_bytes as f64 / KB as f64)
        } else {
            format!("{} bytes", self.size_bytes)
        }
    }
}

/// Cached result of one successful step execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Step signature (content hash)
    pub signature: String,
    /// Step that produced the entry
    pub step_id: String,
    /// Output artifacts of the cached execution
    pub outputs: Vec<Artifact>,
    /// When the entry was cached
    pub created_at: SystemTime,
    /// Entry lifetime; `None` never expires
    pub ttl: Option<Duration>,
}

impl CacheEntry {
    /// Create an entry stamped with the current time
    pub fn new(
        signature: impl Into<String>,
        step_id: impl Into<String>,
        outputs: Vec<Artifact>,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            signature: signature.into(),
            step_id: step_id.into(),
            outputs,
            created_at: SystemTime::now(),
            ttl,
        }
    }

    /// Whether `created_at + ttl` has elapsed at `now`
    pub fn is_expired(&self, now: SystemTime) -> bool {
        match self.ttl {
            Some(ttl) => self
                .created_at
                .checked_add(ttl)
                .map_or(false, |expires| expires <= now),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_expiry() {
        let mut entry = CacheEntry::new("sig", "train", vec![], Some(Duration::from_secs(60)));
        let now = entry.created_at;

        assert!(!entry.is_expired(now));
        assert!(!entry.is_expired(now + Duration::from_secs(59)));
        assert!(entry.is_expired(now + Duration::from_secs(60)));

        entry.ttl = None;
        assert!(!entry.is_expired(now + Duration::from_secs(86_400 * 365)));
    }

    #[test]
    fn test_stats_from_entries() {
        let first = CacheEntry::new("a", "train", vec![], None);
        let mut second = CacheEntry::new("b", "eval", vec![], Some(Duration::from_secs(1)));
        second.created_at = first.created_at - Duration::from_secs(10);

        let stats = CacheStats::from_entries([&first, &second]);
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.oldest_entry, Some(second.created_at));
        assert_eq!(stats.newest_entry, Some(first.created_at));
    }

    #[test]
    fn test_formatted_size() {
        let stats = CacheStats {
            size_bytes: 2048,
            ..Default::default()
        };
        assert_eq!(stats.formatted_size(), "2.00 KB");
    }
}
