//! Configuration
//!
//! Explicit, injected configuration for every component. Instances are
//! constructed with a config and own their state for their whole lifetime;
//! there is no ambient module-level state.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the throttle + retry gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Maximum simultaneous in-flight calls to the remote API
    pub concurrency: usize,
    /// Minimum spacing between calls dispatched from the queue
    pub min_spacing: Duration,
    /// Maximum attempts per operation, including the first
    pub max_attempts: u32,
    /// Bounded wait for a single remote call; expiry classifies as Timeout
    pub call_timeout: Duration,
    /// Occurrences of a retryable category within the window before it
    /// stops being retried automatically
    pub occurrence_cap: u32,
    /// Window after which per-category occurrence counts expire
    pub occurrence_window: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            // ~10 requests/second, under the published per-second limit
            min_spacing: Duration::from_millis(110),
            max_attempts: 3,
            call_timeout: Duration::from_secs(30),
            occurrence_cap: 5,
            occurrence_window: Duration::from_secs(300),
        }
    }
}

/// Configuration for the in-memory query caches.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL for search-style queries (results go stale quickly)
    pub search_ttl: Duration,
    /// TTL for plain folder-listing queries
    pub listing_ttl: Duration,
    /// Maximum entry count; oldest-created entries evicted beyond this
    pub max_entries: usize,
    /// Minimum cached-query length for prefix-extension reuse
    pub min_reuse_len: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            search_ttl: Duration::from_secs(300),
            listing_ttl: Duration::from_secs(900),
            max_entries: 500,
            min_reuse_len: 2,
        }
    }
}

/// Configuration for the persistent offline store.
#[derive(Debug, Clone)]
pub struct OfflineConfig {
    /// Directory for snapshot and index files; defaults to the platform
    /// cache dir under "cloudgate"
    pub dir: Option<PathBuf>,
    /// Total storage budget across all snapshots
    pub max_total_bytes: u64,
    /// Snapshots older than this are invalid on retrieve
    pub snapshot_ttl: Duration,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_total_bytes: 50 * 1024 * 1024,
            snapshot_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Configuration for session and credential guardianship.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How often the refresh tick checks remaining credential lifetime
    pub refresh_check_interval: Duration,
    /// Refresh proactively when remaining lifetime falls below this
    pub refresh_threshold: Duration,
    /// Idle period before entering the inactivity warning state
    pub idle_timeout: Duration,
    /// Warning countdown before forced logout
    pub warning_countdown: Duration,
    /// How often the inactivity tick re-evaluates idle state
    pub inactivity_check_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_check_interval: Duration::from_secs(300),
            refresh_threshold: Duration::from_secs(30 * 60),
            idle_timeout: Duration::from_secs(60 * 60),
            warning_countdown: Duration::from_secs(60),
            inactivity_check_interval: Duration::from_secs(15),
        }
    }
}
