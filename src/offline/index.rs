//! Offline Metadata Index
//!
//! Sidecar index over the stored snapshots: one entry per storage key with
//! size, priority, and access time, used to pick eviction victims. The
//! index is authoritative; when it and the snapshot files diverge it is
//! reconciled against what is actually on disk.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Eviction priority for a stored snapshot. Lower priorities are evicted
/// first; within a priority tier, least-recently-accessed goes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SnapshotPriority {
    Low,
    Medium,
    High,
}

/// Per-snapshot bookkeeping for eviction decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineCacheMetadata {
    /// Storage key (the user ID)
    pub key: String,
    pub size_bytes: u64,
    /// Seconds since the Unix epoch
    pub last_accessed: u64,
    pub priority: SnapshotPriority,
    /// When the snapshot was produced, for stats
    pub last_sync: u64,
}

/// The full index, persisted as one JSON document next to the snapshots.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MetadataIndex {
    entries: HashMap<String, OfflineCacheMetadata>,
}

impl MetadataIndex {
    /// Load the index from disk. A missing or corrupt index file yields an
    /// empty index; entries are rebuilt by reconciliation as snapshots are
    /// touched.
    pub fn load(path: &Path) -> Self {
        match fs::read(path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(index) => index,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Corrupt offline index, rebuilding");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Persist the index atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .context("index path has no parent directory")?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .context("Failed to create temp file for offline index")?;
        let bytes = serde_json::to_vec(self).context("Failed to serialize offline index")?;
        tmp.write_all(&bytes).context("Failed to write offline index")?;
        tmp.persist(path)
            .with_context(|| format!("Failed to persist offline index: {:?}", path))?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&OfflineCacheMetadata> {
        self.entries.get(key)
    }

    pub fn upsert(&mut self, meta: OfflineCacheMetadata) {
        self.entries.insert(meta.key.clone(), meta);
    }

    pub fn remove(&mut self, key: &str) -> Option<OfflineCacheMetadata> {
        self.entries.remove(key)
    }

    /// Record an access, for LRU ordering.
    pub fn touch(&mut self, key: &str, now: u64) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.last_accessed = now;
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.size_bytes).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Most recent snapshot time across all entries.
    pub fn latest_sync(&self) -> Option<u64> {
        self.entries.values().map(|e| e.last_sync).max()
    }

    /// Keys in eviction order: lowest priority first, least recently
    /// accessed first within a tier.
    pub fn eviction_order(&self) -> Vec<String> {
        let mut entries: Vec<&OfflineCacheMetadata> = self.entries.values().collect();
        entries.sort_by_key(|e| (e.priority, e.last_accessed));
        let keys: Vec<String> = entries.into_iter().map(|e| e.key.clone()).collect();
        debug!(candidates = keys.len(), "Computed eviction order");
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(key: &str, size: u64, accessed: u64, priority: SnapshotPriority) -> OfflineCacheMetadata {
        OfflineCacheMetadata {
            key: key.to_string(),
            size_bytes: size,
            last_accessed: accessed,
            priority,
            last_sync: accessed,
        }
    }

    #[test]
    fn test_eviction_order_priority_then_lru() {
        let mut index = MetadataIndex::default();
        index.upsert(meta("old-high", 1, 10, SnapshotPriority::High));
        index.upsert(meta("new-low", 1, 100, SnapshotPriority::Low));
        index.upsert(meta("old-low", 1, 10, SnapshotPriority::Low));
        index.upsert(meta("medium", 1, 50, SnapshotPriority::Medium));

        assert_eq!(
            index.eviction_order(),
            vec!["old-low", "new-low", "medium", "old-high"]
        );
    }

    #[test]
    fn test_total_bytes_and_touch() {
        let mut index = MetadataIndex::default();
        index.upsert(meta("a", 100, 1, SnapshotPriority::Medium));
        index.upsert(meta("b", 50, 2, SnapshotPriority::Medium));
        assert_eq!(index.total_bytes(), 150);

        index.touch("a", 99);
        assert_eq!(index.get("a").unwrap().last_accessed, 99);
    }

    #[test]
    fn test_load_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        assert!(MetadataIndex::load(&path).is_empty());

        std::fs::write(&path, b"not json").unwrap();
        assert!(MetadataIndex::load(&path).is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        let mut index = MetadataIndex::default();
        index.upsert(meta("u1", 42, 7, SnapshotPriority::High));
        index.save(&path).unwrap();

        let reloaded = MetadataIndex::load(&path);
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("u1").unwrap().size_bytes, 42);
    }
}
