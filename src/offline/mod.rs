//! Persistent Offline Cache
//!
//! Size-bounded, persistent snapshot cache that survives process restarts.
//! One sanitized snapshot per user, a sidecar metadata index for LRU
//! eviction, and a schema-version gate. Best-effort by contract: storage
//! failures are logged, never propagated.

mod index;
mod store;

pub use index::{MetadataIndex, OfflineCacheMetadata, SnapshotPriority};
pub use store::{OfflineSnapshot, OfflineStats, OfflineStore, SCHEMA_VERSION};
