//! Search Cache
//!
//! Layer over [`ResultCache`] for search queries with two extra behaviors:
//!
//! - Incremental reuse: a query that extends a previously cached query
//!   ("rep" after "re") for the same user and folder scope is answered by
//!   filtering the cached broader set in memory, with no network call. The
//!   cached query must have a minimum length, so a one-character result set
//!   is never treated as a superset.
//! - In-flight deduplication: concurrent identical queries share a single
//!   pending call; every caller receives the same eventual result.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::classify::ClassifiedError;
use crate::config::CacheConfig;
use crate::types::RemoteItem;

use super::key::CacheKey;
use super::result_cache::ResultCache;

type SearchOutcome = Result<Vec<RemoteItem>, ClassifiedError>;

/// Search cache with incremental reuse and request coalescing.
pub struct SearchCache {
    results: ResultCache<Vec<RemoteItem>>,
    /// Pending fetches by key; subscribers receive the leader's outcome
    pending: Mutex<HashMap<String, broadcast::Sender<SearchOutcome>>>,
    min_reuse_len: usize,
}

/// Removes the pending-map entry when the leader finishes or is dropped
/// mid-flight, so a cancelled leader never wedges the key.
struct PendingGuard<'a> {
    cache: &'a SearchCache,
    key: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.cache.pending.lock().unwrap().remove(&self.key);
    }
}

impl SearchCache {
    pub fn new(config: CacheConfig) -> Self {
        let min_reuse_len = config.min_reuse_len;
        Self {
            results: ResultCache::new(config),
            pending: Mutex::new(HashMap::new()),
            min_reuse_len,
        }
    }

    /// Resolve a search query: cached exact hit, incremental reuse of a
    /// broader cached set, or a deduplicated fetch.
    ///
    /// `fetch` is invoked at most once, and only when this caller becomes
    /// the leader for the key.
    pub async fn search<F, Fut>(&self, key: &CacheKey, fetch: F) -> SearchOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SearchOutcome>,
    {
        // Paginated requests are not independently cacheable; fetch direct.
        if !key.is_first_page() {
            return fetch().await;
        }

        let key_str = key.generate();
        let mut fetch = Some(fetch);

        loop {
            if let Some(items) = self.results.get(&key_str) {
                return Ok(items);
            }

            if let Some((items, ttl)) = self.reuse_broader(key) {
                // Derived data is no fresher than its source; inherit the
                // source entry's remaining lifetime
                self.results.set(key_str.clone(), items.clone(), ttl);
                return Ok(items);
            }

            // Join or start the in-flight call for this key.
            let role = {
                let mut pending = self.pending.lock().unwrap();
                match pending.get(&key_str) {
                    Some(tx) => Role::Follower(tx.subscribe()),
                    None => {
                        let (tx, _) = broadcast::channel(1);
                        pending.insert(key_str.clone(), tx.clone());
                        Role::Leader(tx)
                    }
                }
            };

            match role {
                Role::Follower(mut rx) => {
                    trace!(key = %key_str, "Joining in-flight search");
                    match rx.recv().await {
                        Ok(outcome) => return outcome,
                        // Leader dropped without a result; start over
                        Err(_) => continue,
                    }
                }
                Role::Leader(tx) => {
                    let _guard = PendingGuard {
                        cache: self,
                        key: key_str.clone(),
                    };
                    let f = fetch.take().expect("leader fetch consumed twice");
                    debug!(key = %key_str, "Search cache miss, fetching");
                    let outcome = f().await;
                    if let Ok(items) = &outcome {
                        self.results.set_query(key, items.clone());
                    }
                    // No waiting followers is fine
                    let _ = tx.send(outcome.clone());
                    return outcome;
                }
            }
        }
    }

    /// Find a cached broader result set this query can be answered from:
    /// same user, same folder scope, cached query a prefix of the new query
    /// with at least the minimum reuse length. Returns the filtered items
    /// and the source entry's remaining TTL.
    fn reuse_broader(&self, key: &CacheKey) -> Option<(Vec<RemoteItem>, Duration)> {
        let query = key.query.as_deref()?;
        let prefix = CacheKey::user_prefix(&key.user_id);

        let candidates = self.results.scan(|k| k.starts_with(&prefix));
        let mut best: Option<(usize, String, Vec<RemoteItem>)> = None;
        for (cached_key, items) in candidates {
            let Some(parsed) = CacheKey::parse(&cached_key) else {
                continue;
            };
            let Some(cached_query) = parsed.query.as_deref() else {
                continue;
            };
            if parsed.parent_id != key.parent_id
                || parsed.page_token.is_some()
                || cached_query.len() < self.min_reuse_len
                || cached_query.len() >= query.len()
                || !query.starts_with(cached_query)
            {
                continue;
            }
            // Prefer the most specific cached superset
            if best.as_ref().map_or(true, |(len, _, _)| cached_query.len() > *len) {
                best = Some((cached_query.len(), cached_key, items));
            }
        }

        let (_, source_key, items) = best?;
        let ttl = self.results.remaining_ttl(&source_key)?;
        let filtered: Vec<RemoteItem> = items
            .into_iter()
            .filter(|item| item.matches_query(query))
            .collect();
        debug!(
            user = %key.user_id,
            query,
            matched = filtered.len(),
            ttl_secs = ttl.as_secs(),
            "Answered search from broader cached result"
        );
        Some((filtered, ttl))
    }

    /// The underlying result cache, shared with listing callers and
    /// invalidation hooks.
    pub fn results(&self) -> &ResultCache<Vec<RemoteItem>> {
        &self.results
    }

    pub fn invalidate_user(&self, user_id: &str) {
        self.results.invalidate_user(user_id);
    }

    pub fn invalidate_folder(&self, user_id: &str, folder_id: &str) {
        self.results.invalidate_folder(user_id, folder_id);
    }
}

enum Role {
    Leader(broadcast::Sender<SearchOutcome>),
    Follower(broadcast::Receiver<SearchOutcome>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn item(id: &str, name: &str) -> RemoteItem {
        RemoteItem {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: "application/pdf".to_string(),
            parent_id: Some("f1".to_string()),
            size_bytes: 10,
            modified_at: 0,
        }
    }

    fn sample() -> Vec<RemoteItem> {
        vec![
            item("1", "report.pdf"),
            item("2", "recipes.txt"),
            item("3", "notes.md"),
        ]
    }

    #[tokio::test]
    async fn test_exact_hit_skips_fetch() {
        let cache = SearchCache::new(CacheConfig::default());
        let key = CacheKey::search("u1", Some("f1".into()), "re");
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            let result = cache
                .search(&key, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(sample())
                })
                .await
                .unwrap();
            assert_eq!(result.len(), 3);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prefix_extension_reuse_no_network() {
        let cache = SearchCache::new(CacheConfig::default());
        let broad = CacheKey::search("u1", Some("f1".into()), "re");
        cache
            .search(&broad, || async { Ok(sample()) })
            .await
            .unwrap();

        // "rep" extends "re": answered from the cached set, no fetch
        let narrow = CacheKey::search("u1", Some("f1".into()), "rep");
        let result = cache
            .search(&narrow, || async {
                panic!("must not fetch for a prefix extension")
            })
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name, "report.pdf");
    }

    #[tokio::test]
    async fn test_reuse_never_crosses_users_or_folders() {
        let cache = SearchCache::new(CacheConfig::default());
        let broad = CacheKey::search("u1", Some("f1".into()), "re");
        cache
            .search(&broad, || async { Ok(sample()) })
            .await
            .unwrap();

        let other_user = CacheKey::search("u2", Some("f1".into()), "rep");
        let fetched = Arc::new(AtomicU32::new(0));
        let f = Arc::clone(&fetched);
        cache
            .search(&other_user, move || async move {
                f.fetch_add(1, Ordering::SeqCst);
                Ok(vec![])
            })
            .await
            .unwrap();
        assert_eq!(fetched.load(Ordering::SeqCst), 1, "different user forces a new call");

        let other_folder = CacheKey::search("u1", Some("f2".into()), "rep");
        let f = Arc::clone(&fetched);
        cache
            .search(&other_folder, move || async move {
                f.fetch_add(1, Ordering::SeqCst);
                Ok(vec![])
            })
            .await
            .unwrap();
        assert_eq!(fetched.load(Ordering::SeqCst), 2, "different folder forces a new call");
    }

    #[tokio::test]
    async fn test_reuse_requires_min_cached_length() {
        let cache = SearchCache::new(CacheConfig::default());
        let single = CacheKey::search("u1", Some("f1".into()), "r");
        cache
            .search(&single, || async { Ok(sample()) })
            .await
            .unwrap();

        // Cached query "r" is below the reuse minimum; must fetch
        let narrow = CacheKey::search("u1", Some("f1".into()), "re");
        let fetched = Arc::new(AtomicU32::new(0));
        let f = Arc::clone(&fetched);
        cache
            .search(&narrow, move || async move {
                f.fetch_add(1, Ordering::SeqCst);
                Ok(vec![])
            })
            .await
            .unwrap();
        assert_eq!(fetched.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_derived_result_expires_with_its_source() {
        let cache = SearchCache::new(CacheConfig::default());
        let broad = CacheKey::search("u1", Some("f1".into()), "re");
        cache
            .search(&broad, || async { Ok(sample()) })
            .await
            .unwrap();

        // Answer "rep" from the broad set when 100s of its 300s TTL remain
        tokio::time::advance(Duration::from_secs(200)).await;
        let narrow = CacheKey::search("u1", Some("f1".into()), "rep");
        cache
            .search(&narrow, || async { panic!("broad set still valid") })
            .await
            .unwrap();

        // 150s later the source would be expired; the derived entry must
        // not outlive it, so this query has to fetch
        tokio::time::advance(Duration::from_secs(150)).await;
        let fetched = Arc::new(AtomicU32::new(0));
        let f = Arc::clone(&fetched);
        cache
            .search(&narrow, move || async move {
                f.fetch_add(1, Ordering::SeqCst);
                Ok(vec![])
            })
            .await
            .unwrap();
        assert_eq!(fetched.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_identical_queries_share_one_call() {
        let cache = Arc::new(SearchCache::new(CacheConfig::default()));
        let key = CacheKey::search("u1", Some("f1".into()), "re");
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .search(&key, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        // Hold the call open so followers pile up
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(sample())
                    })
                    .await
            }));
        }

        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result.len(), 3);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_shared_and_not_cached() {
        let cache = SearchCache::new(CacheConfig::default());
        let key = CacheKey::search("u1", Some("f1".into()), "re");

        let err = cache
            .search(&key, || async { Err(ClassifiedError::cancelled()) })
            .await
            .unwrap_err();
        assert!(!err.retryable);

        // Failure was not cached; next call fetches again
        let result = cache.search(&key, || async { Ok(sample()) }).await.unwrap();
        assert_eq!(result.len(), 3);
    }
}
