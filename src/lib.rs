//! cloudgate - Client resiliency and caching layer for cloud storage APIs
//!
//! Sits between application logic and a remote, quota-limited, session-scoped
//! storage API. Governs how and when calls reach the remote API (admission
//! control, retry with error classification) and how results are remembered
//! (query cache, incremental search cache, persistent offline snapshots),
//! plus credential refresh and inactivity tracking.
//!
//! Call flow: callers check [`cache::SearchCache`]/[`cache::ResultCache`];
//! on miss, [`gateway::ApiGateway::call`] admits the call through
//! [`throttle::RequestThrottle`], executes it via [`retry::RetryExecutor`]
//! consulting [`classify::ErrorClassifier`] on failure, and successful
//! results populate the caches and [`offline::OfflineStore`].
//! [`session::SessionGuardian`] runs independently on activity-driven timers.

pub mod cache;
pub mod classify;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod offline;
pub mod progressive;
pub mod retry;
pub mod session;
pub mod throttle;
pub mod types;

pub use cache::{CacheEntry, CacheKey, ResultCache, SearchCache};
pub use classify::{ClassifiedError, ErrorCategory, ErrorClassifier, RecoveryAction};
pub use config::{CacheConfig, GatewayConfig, OfflineConfig, SessionConfig};
pub use errors::ApiError;
pub use gateway::ApiGateway;
pub use offline::{OfflineStats, OfflineStore, OfflineSnapshot, SnapshotPriority};
pub use progressive::{LoadError, LoadStage, ProgressiveFieldLoader, StageFetcher, StageReport};
pub use retry::RetryExecutor;
pub use session::{
    CredentialSource, SessionEvent, SessionEventKind, SessionGuardian, SessionPhase,
};
pub use throttle::{RequestThrottle, ThrottleTicket};
pub use types::RemoteItem;
