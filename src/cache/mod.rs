//! Query Result Caching
//!
//! Keyed, TTL-based caching of remote query results, scoped by user and
//! logical query shape, with explicit invalidation hooks for mutating
//! operations and incremental reuse for search queries.

mod key;
mod result_cache;
mod search_cache;

pub use key::CacheKey;
pub use result_cache::{CacheEntry, ResultCache};
pub use search_cache::SearchCache;
