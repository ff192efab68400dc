//! Offline Snapshot Store
//!
//! Persists one sanitized snapshot of a user's items to local disk so the
//! app can browse and search offline. Enforces a total storage budget with
//! LRU eviction before each write, gates retrieval on schema version and
//! age, and writes atomically. Persistence failures are logged and
//! swallowed — offline caching is an optimization, not a correctness
//! requirement.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::OfflineConfig;
use crate::types::RemoteItem;

use super::index::{MetadataIndex, OfflineCacheMetadata, SnapshotPriority};

/// Bumped whenever the snapshot layout changes; older snapshots are
/// discarded rather than migrated.
pub const SCHEMA_VERSION: u32 = 2;

const INDEX_FILE: &str = "index.json";

/// A full offline snapshot for one user. Superseded whole on re-sync,
/// never merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineSnapshot {
    pub user_id: String,
    pub items: Vec<RemoteItem>,
    /// Seconds since the Unix epoch
    pub last_sync: u64,
    pub schema_version: u32,
}

/// Aggregate store statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineStats {
    pub size_bytes: u64,
    pub entry_count: usize,
    pub last_sync: Option<u64>,
}

/// Size-bounded persistent snapshot store with LRU eviction.
pub struct OfflineStore {
    dir: PathBuf,
    max_total_bytes: u64,
    snapshot_ttl: Duration,
    index: Mutex<MetadataIndex>,
}

impl OfflineStore {
    /// Open (or create) the store. Loads the metadata index and removes
    /// stale temp files from interrupted writes.
    pub fn new(config: OfflineConfig) -> Result<Self> {
        let dir = match config.dir {
            Some(dir) => dir,
            None => dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("cloudgate"),
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create offline cache directory: {:?}", dir))?;

        let index = MetadataIndex::load(&dir.join(INDEX_FILE));
        let store = Self {
            dir,
            max_total_bytes: config.max_total_bytes,
            snapshot_ttl: config.snapshot_ttl,
            index: Mutex::new(index),
        };
        store.cleanup_temp_files();

        info!(
            dir = %store.dir.display(),
            budget_mb = store.max_total_bytes / (1024 * 1024),
            entries = store.index.lock().unwrap().len(),
            "Offline store opened"
        );
        Ok(store)
    }

    /// Store a snapshot for a user, evicting older snapshots if the budget
    /// requires. Best-effort: failures are logged, never returned.
    pub fn store(&self, user_id: &str, items: Vec<RemoteItem>, priority: SnapshotPriority) {
        if let Err(e) = self.try_store(user_id, items, priority) {
            warn!(user = %user_id, error = %e, "Offline snapshot write failed (ignored)");
        }
    }

    fn try_store(
        &self,
        user_id: &str,
        items: Vec<RemoteItem>,
        priority: SnapshotPriority,
    ) -> Result<()> {
        let now = epoch_secs();
        let snapshot = OfflineSnapshot {
            user_id: user_id.to_string(),
            items,
            last_sync: now,
            schema_version: SCHEMA_VERSION,
        };
        let bytes = serde_json::to_vec(&snapshot).context("Failed to serialize snapshot")?;
        let size = bytes.len() as u64;

        if size > self.max_total_bytes {
            return Err(anyhow!(
                "snapshot of {} bytes exceeds the {} byte budget",
                size,
                self.max_total_bytes
            ));
        }

        {
            let mut index = self.index.lock().unwrap();
            // The old snapshot for this user is superseded, not counted
            index.remove(user_id);
            self.evict_for(&mut index, size);

            let path = self.snapshot_path(user_id);
            let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
                .context("Failed to create temp file for snapshot")?;
            tmp.write_all(&bytes).context("Failed to write snapshot")?;
            tmp.persist(&path)
                .with_context(|| format!("Failed to persist snapshot: {:?}", path))?;

            index.upsert(OfflineCacheMetadata {
                key: user_id.to_string(),
                size_bytes: size,
                last_accessed: now,
                priority,
                last_sync: now,
            });
            index.save(&self.dir.join(INDEX_FILE))?;
        }

        debug!(user = %user_id, size, "Stored offline snapshot");
        Ok(())
    }

    /// Retrieve a user's snapshot. Returns None (and deletes the entry)
    /// when the snapshot is missing, corrupt, from another schema version,
    /// or older than the TTL.
    pub fn retrieve(&self, user_id: &str) -> Option<OfflineSnapshot> {
        let mut index = self.index.lock().unwrap();
        let snapshot = match self.read_valid(&mut index, user_id) {
            Some(snapshot) => snapshot,
            None => {
                self.save_index(&index);
                return None;
            }
        };

        index.touch(user_id, epoch_secs());
        self.save_index(&index);
        Some(snapshot)
    }

    /// Whether a usable snapshot exists, without counting as an access.
    pub fn is_available(&self, user_id: &str) -> bool {
        let mut index = self.index.lock().unwrap();
        let available = self.read_valid(&mut index, user_id).is_some();
        self.save_index(&index);
        available
    }

    /// Search a user's offline snapshot by name.
    pub fn search(&self, user_id: &str, text: &str) -> Vec<RemoteItem> {
        match self.retrieve(user_id) {
            Some(snapshot) => snapshot
                .items
                .into_iter()
                .filter(|item| item.matches_query(text))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Drop every snapshot past its TTL or from another schema version.
    pub fn clear_expired(&self) {
        let mut index = self.index.lock().unwrap();
        for key in index.keys() {
            if self.read_valid(&mut index, &key).is_none() {
                debug!(user = %key, "Removed expired offline snapshot");
            }
        }
        self.save_index(&index);
    }

    /// Remove all snapshots and reset the index.
    pub fn clear(&self) {
        let mut index = self.index.lock().unwrap();
        for key in index.keys() {
            let _ = fs::remove_file(self.snapshot_path(&key));
            index.remove(&key);
        }
        self.save_index(&index);
        info!("Offline store cleared");
    }

    pub fn stats(&self) -> OfflineStats {
        let index = self.index.lock().unwrap();
        OfflineStats {
            size_bytes: index.total_bytes(),
            entry_count: index.len(),
            last_sync: index.latest_sync(),
        }
    }

    /// Read and validate a snapshot, reconciling the index against disk:
    /// a dangling index entry is dropped, an unindexed file gets a rebuilt
    /// entry, and invalid snapshots are deleted.
    fn read_valid(&self, index: &mut MetadataIndex, user_id: &str) -> Option<OfflineSnapshot> {
        let path = self.snapshot_path(user_id);

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(_) => {
                if index.remove(user_id).is_some() {
                    warn!(user = %user_id, "Index entry without snapshot file, dropped");
                }
                return None;
            }
        };

        if index.get(user_id).is_none() {
            warn!(user = %user_id, "Snapshot file without index entry, rebuilding entry");
            index.upsert(OfflineCacheMetadata {
                key: user_id.to_string(),
                size_bytes: bytes.len() as u64,
                last_accessed: epoch_secs(),
                priority: SnapshotPriority::Medium,
                last_sync: epoch_secs(),
            });
        }

        let snapshot: OfflineSnapshot = match serde_json::from_slice(&bytes) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(user = %user_id, error = %e, "Corrupt offline snapshot, removing");
                self.discard(index, user_id);
                return None;
            }
        };

        if snapshot.user_id != user_id {
            warn!(
                user = %user_id,
                found = %snapshot.user_id,
                "Snapshot belongs to a different user, removing"
            );
            self.discard(index, user_id);
            return None;
        }

        if snapshot.schema_version != SCHEMA_VERSION {
            debug!(
                user = %user_id,
                found = snapshot.schema_version,
                expected = SCHEMA_VERSION,
                "Snapshot schema version mismatch, removing"
            );
            self.discard(index, user_id);
            return None;
        }

        let age = epoch_secs().saturating_sub(snapshot.last_sync);
        if age > self.snapshot_ttl.as_secs() {
            debug!(user = %user_id, age_secs = age, "Snapshot past TTL, removing");
            self.discard(index, user_id);
            return None;
        }

        Some(snapshot)
    }

    /// Evict snapshots until `incoming` bytes fit inside the budget.
    fn evict_for(&self, index: &mut MetadataIndex, incoming: u64) {
        while index.total_bytes() + incoming > self.max_total_bytes {
            let Some(victim) = index.eviction_order().into_iter().next() else {
                break;
            };
            let freed = index.remove(&victim).map(|m| m.size_bytes).unwrap_or(0);
            let _ = fs::remove_file(self.snapshot_path(&victim));
            info!(user = %victim, freed, "Evicted offline snapshot for space");
        }
    }

    fn discard(&self, index: &mut MetadataIndex, user_id: &str) {
        let _ = fs::remove_file(self.snapshot_path(user_id));
        index.remove(user_id);
    }

    fn save_index(&self, index: &MetadataIndex) {
        if let Err(e) = index.save(&self.dir.join(INDEX_FILE)) {
            warn!(error = %e, "Failed to persist offline index (ignored)");
        }
    }

    /// Filesystem-safe, injective encoding of a user ID: `_` is doubled and
    /// any other unsafe character becomes `_xx` per UTF-8 byte, so distinct
    /// user IDs never share a snapshot file.
    fn snapshot_path(&self, user_id: &str) -> PathBuf {
        let mut safe = String::with_capacity(user_id.len());
        for c in user_id.chars() {
            match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '-' => safe.push(c),
                '_' => safe.push_str("__"),
                other => {
                    let mut buf = [0u8; 4];
                    for byte in other.encode_utf8(&mut buf).bytes() {
                        safe.push_str(&format!("_{:02x}", byte));
                    }
                }
            }
        }
        self.dir.join(format!("snapshot_{}.json", safe))
    }

    /// Remove temp files left by interrupted writes.
    fn cleanup_temp_files(&self) {
        if let Ok(read_dir) = fs::read_dir(&self.dir) {
            for entry in read_dir.flatten() {
                let path = entry.path();
                let is_tmp = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(".tmp"))
                    .unwrap_or(false);
                if is_tmp {
                    debug!(path = %path.display(), "Removing stale temp file");
                    let _ = fs::remove_file(&path);
                }
            }
        }
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, name: &str) -> RemoteItem {
        RemoteItem {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: "text/plain".to_string(),
            parent_id: None,
            size_bytes: 1,
            modified_at: 0,
        }
    }

    fn store_in(dir: &std::path::Path, budget: u64) -> OfflineStore {
        OfflineStore::new(OfflineConfig {
            dir: Some(dir.to_path_buf()),
            max_total_bytes: budget,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_store_and_retrieve_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path(), 1024 * 1024);

        store.store("u1", vec![item("1", "a.txt"), item("2", "b.txt")], SnapshotPriority::Medium);

        assert!(store.is_available("u1"));
        let snapshot = store.retrieve("u1").unwrap();
        assert_eq!(snapshot.user_id, "u1");
        assert_eq!(snapshot.items.len(), 2);
        assert_eq!(snapshot.schema_version, SCHEMA_VERSION);
        assert!(!store.is_available("u2"));
    }

    #[test]
    fn test_resync_supersedes_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path(), 1024 * 1024);

        store.store("u1", vec![item("1", "old.txt")], SnapshotPriority::Medium);
        store.store("u1", vec![item("2", "new.txt")], SnapshotPriority::Medium);

        let snapshot = store.retrieve("u1").unwrap();
        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(snapshot.items[0].name, "new.txt");
        assert_eq!(store.stats().entry_count, 1);
    }

    #[test]
    fn test_budget_triggers_lru_eviction() {
        let tmp = tempfile::tempdir().unwrap();
        // Budget fits roughly one snapshot of this size
        let items: Vec<RemoteItem> = (0..20)
            .map(|i| item(&format!("id-{}", i), &format!("file-number-{}.txt", i)))
            .collect();
        let one_size = serde_json::to_vec(&OfflineSnapshot {
            user_id: "u1".to_string(),
            items: items.clone(),
            last_sync: 0,
            schema_version: SCHEMA_VERSION,
        })
        .unwrap()
        .len() as u64;

        let store = store_in(tmp.path(), one_size + one_size / 2);
        store.store("u1", items.clone(), SnapshotPriority::Medium);
        assert!(store.is_available("u1"));

        // Second snapshot does not fit beside the first; u1 is evicted
        store.store("u2", items, SnapshotPriority::Medium);
        assert!(store.is_available("u2"));
        assert!(!store.is_available("u1"));
    }

    #[test]
    fn test_oversized_snapshot_rejected_without_panic() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path(), 16);

        store.store("u1", vec![item("1", "too-big-to-ever-fit.bin")], SnapshotPriority::High);
        assert!(!store.is_available("u1"));
        assert_eq!(store.stats().entry_count, 0);
    }

    #[test]
    fn test_similar_user_ids_never_share_a_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path(), 1024 * 1024);

        // Both IDs would collapse to "a_b" under a lossy sanitizer
        store.store("a/b", vec![item("1", "slash.txt")], SnapshotPriority::Medium);
        store.store("a_b", vec![item("2", "underscore.txt")], SnapshotPriority::Medium);

        let slash = store.retrieve("a/b").unwrap();
        assert_eq!(slash.user_id, "a/b");
        assert_eq!(slash.items[0].name, "slash.txt");

        let underscore = store.retrieve("a_b").unwrap();
        assert_eq!(underscore.user_id, "a_b");
        assert_eq!(underscore.items[0].name, "underscore.txt");

        assert_eq!(store.stats().entry_count, 2);
    }

    #[test]
    fn test_snapshot_for_wrong_user_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path(), 1024 * 1024);
        store.store("u1", vec![item("1", "a.txt")], SnapshotPriority::Medium);

        // Rewrite the file so it claims to belong to someone else
        let path = tmp.path().join("snapshot_u1.json");
        let mut snapshot: OfflineSnapshot =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        snapshot.user_id = "intruder".to_string();
        fs::write(&path, serde_json::to_vec(&snapshot).unwrap()).unwrap();

        assert!(store.retrieve("u1").is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_schema_version_gate() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path(), 1024 * 1024);
        store.store("u1", vec![item("1", "a.txt")], SnapshotPriority::Medium);

        // Rewrite the snapshot as an older schema version
        let path = tmp.path().join("snapshot_u1.json");
        let mut snapshot: OfflineSnapshot =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        snapshot.schema_version = SCHEMA_VERSION - 1;
        fs::write(&path, serde_json::to_vec(&snapshot).unwrap()).unwrap();

        assert!(store.retrieve("u1").is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_stale_snapshot_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path(), 1024 * 1024);
        store.store("u1", vec![item("1", "a.txt")], SnapshotPriority::Medium);

        // Age the snapshot past the 24h TTL
        let path = tmp.path().join("snapshot_u1.json");
        let mut snapshot: OfflineSnapshot =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        snapshot.last_sync = epoch_secs() - 25 * 60 * 60;
        fs::write(&path, serde_json::to_vec(&snapshot).unwrap()).unwrap();

        assert!(store.retrieve("u1").is_none());
    }

    #[test]
    fn test_reconciles_unindexed_file() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let store = store_in(tmp.path(), 1024 * 1024);
            store.store("u1", vec![item("1", "a.txt")], SnapshotPriority::Medium);
        }
        // Simulate an externally cleared index
        fs::remove_file(tmp.path().join(INDEX_FILE)).unwrap();

        let store = store_in(tmp.path(), 1024 * 1024);
        let snapshot = store.retrieve("u1").unwrap();
        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(store.stats().entry_count, 1);
    }

    #[test]
    fn test_reconciles_dangling_index_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path(), 1024 * 1024);
        store.store("u1", vec![item("1", "a.txt")], SnapshotPriority::Medium);

        // Storage cleared externally, index left behind
        fs::remove_file(tmp.path().join("snapshot_u1.json")).unwrap();

        assert!(store.retrieve("u1").is_none());
        assert_eq!(store.stats().entry_count, 0);
    }

    #[test]
    fn test_offline_search() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path(), 1024 * 1024);
        store.store(
            "u1",
            vec![item("1", "report.pdf"), item("2", "notes.md")],
            SnapshotPriority::Medium,
        );

        let hits = store.search("u1", "rep");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "report.pdf");
        assert!(store.search("u2", "rep").is_empty());
    }

    #[test]
    fn test_clear_removes_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path(), 1024 * 1024);
        store.store("u1", vec![item("1", "a")], SnapshotPriority::Medium);
        store.store("u2", vec![item("2", "b")], SnapshotPriority::High);

        store.clear();
        assert_eq!(store.stats().entry_count, 0);
        assert!(!store.is_available("u1"));
        assert!(!store.is_available("u2"));
    }
}
