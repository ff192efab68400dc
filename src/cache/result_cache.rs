//! Result Cache
//!
//! TTL-based cache of query results. Entries expire lazily on lookup; an
//! entry is never returned past its TTL. The cache also bounds total entry
//! count, evicting oldest-created entries first under insert pressure.
//! Mutating operations invalidate by user or folder scope through key
//! prefixes; coarse user-wide invalidation is always correct.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::CacheConfig;

use super::key::CacheKey;

/// A cached value with its creation time and TTL.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) > self.ttl
    }
}

/// Keyed TTL cache with bounded entry count.
pub struct ResultCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> ResultCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a value. Expired entries are evicted here and count as
    /// misses.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if !entry.expired(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(key, "Result cache HIT");
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(key, "Result cache expired entry");
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(key, "Result cache MISS");
                None
            }
        }
    }

    /// Insert a value with an explicit TTL.
    pub fn set(&self, key: String, value: V, ttl: Duration) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key,
            CacheEntry {
                value,
                created_at: Instant::now(),
                ttl,
            },
        );
        Self::enforce_capacity(&mut entries, self.config.max_entries);
    }

    /// Insert a query result with shape-appropriate TTL. Non-first-page
    /// results are never cached.
    pub fn set_query(&self, key: &CacheKey, value: V) {
        if !key.is_first_page() {
            trace!(user = %key.user_id, "Skipping cache for paginated result");
            return;
        }
        let ttl = if key.query.is_some() {
            self.config.search_ttl
        } else {
            self.config.listing_ttl
        };
        self.set(key.generate(), value, ttl);
    }

    /// Remove every entry whose key matches the predicate. Returns the
    /// number removed.
    pub fn invalidate<F: Fn(&str) -> bool>(&self, predicate: F) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|key, _| !predicate(key));
        before - entries.len()
    }

    /// Invalidate every cached result for a user. Always-correct fallback
    /// for mutating operations.
    pub fn invalidate_user(&self, user_id: &str) {
        let prefix = CacheKey::user_prefix(user_id);
        let removed = self.invalidate(|key| key.starts_with(&prefix));
        debug!(user = %user_id, removed, "Invalidated cached results for user");
    }

    /// Invalidate results scoped to one folder for a user.
    pub fn invalidate_folder(&self, user_id: &str, folder_id: &str) {
        let prefix = CacheKey::folder_prefix(user_id, folder_id);
        let removed = self.invalidate(|key| key.starts_with(&prefix));
        debug!(user = %user_id, folder = %folder_id, removed, "Invalidated cached folder results");
    }

    /// Remaining lifetime of an unexpired entry.
    pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.lock().unwrap();
        let entry = entries.get(key)?;
        if entry.expired(now) {
            return None;
        }
        Some(entry.ttl - now.duration_since(entry.created_at))
    }

    /// Unexpired entries whose keys match the predicate.
    pub fn scan<F: Fn(&str) -> bool>(&self, predicate: F) -> Vec<(String, V)> {
        let now = Instant::now();
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .filter(|(key, entry)| !entry.expired(now) && predicate(key))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (hits, misses, hit rate percent)
    pub fn stats(&self) -> (u64, u64, f64) {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        (hits, misses, rate)
    }

    /// Drop oldest-created entries until the count fits the bound.
    fn enforce_capacity(entries: &mut HashMap<String, CacheEntry<V>>, max: usize) {
        if entries.len() <= max {
            return;
        }
        let mut by_age: Vec<(String, Instant)> = entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.created_at))
            .collect();
        by_age.sort_by_key(|(_, created)| *created);

        let excess = entries.len() - max;
        for (key, _) in by_age.into_iter().take(excess) {
            entries.remove(&key);
        }
        debug!(evicted = excess, "Result cache over capacity, evicted oldest entries");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> ResultCache<String> {
        ResultCache::new(CacheConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_get_and_ttl_expiry() {
        let c = cache();
        c.set("k".into(), "v".into(), Duration::from_secs(1));
        assert_eq!(c.get("k"), Some("v".to_string()));

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert_eq!(c.get("k"), None);
        // Expired entry was evicted lazily
        assert!(c.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_user_scopes_correctly() {
        let c = cache();
        let mine = CacheKey::listing("u1", "root");
        let theirs = CacheKey::listing("u2", "root");
        c.set_query(&mine, "mine".into());
        c.set_query(&theirs, "theirs".into());

        c.invalidate_user("u1");
        assert_eq!(c.get(&mine.generate()), None);
        assert_eq!(c.get(&theirs.generate()), Some("theirs".to_string()));
    }

    #[tokio::test]
    async fn test_invalidate_folder_leaves_other_folders() {
        let c = cache();
        let docs = CacheKey::listing("u1", "docs");
        let pics = CacheKey::listing("u1", "pics");
        c.set_query(&docs, "d".into());
        c.set_query(&pics, "p".into());

        c.invalidate_folder("u1", "docs");
        assert_eq!(c.get(&docs.generate()), None);
        assert_eq!(c.get(&pics.generate()), Some("p".to_string()));
    }

    #[tokio::test]
    async fn test_paginated_results_never_cached() {
        let c = cache();
        let key = CacheKey::listing("u1", "root").with_page_token("page2");
        c.set_query(&key, "page".into());
        assert!(c.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest_created() {
        let c = ResultCache::new(CacheConfig {
            max_entries: 2,
            ..Default::default()
        });
        c.set("a".into(), 1, Duration::from_secs(60));
        tokio::time::advance(Duration::from_millis(10)).await;
        c.set("b".into(), 2, Duration::from_secs(60));
        tokio::time::advance(Duration::from_millis(10)).await;
        c.set("c".into(), 3, Duration::from_secs(60));

        assert_eq!(c.len(), 2);
        assert_eq!(c.get("a"), None);
        assert_eq!(c.get("b"), Some(2));
        assert_eq!(c.get("c"), Some(3));
    }

    #[tokio::test]
    async fn test_stats_track_hits_and_misses() {
        let c = cache();
        assert_eq!(c.get("nope"), None);
        c.set("k".into(), "v".into(), Duration::from_secs(60));
        assert!(c.get("k").is_some());

        let (hits, misses, rate) = c.stats();
        assert_eq!(hits, 1);
        assert_eq!(misses, 1);
        assert!(rate > 49.0 && rate < 51.0);
    }
}
