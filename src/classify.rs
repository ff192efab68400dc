//! Error Classification
//!
//! Maps raw API failures to a finite set of categories with a retryability
//! flag and a recommended recovery action. Classification is a pure function
//! of the raw error, except for a windowed per-category occurrence counter
//! used to cap automatic retries: once a category keeps failing within the
//! window, its errors stop classifying as retryable until the window lapses.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::errors::ApiError;

/// Error category, ordered by classification priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    RateLimit,
    QuotaExceeded,
    AuthExpired,
    PermissionDenied,
    NotFound,
    Timeout,
    Network,
    Server,
    Unknown,
}

impl ErrorCategory {
    /// Backoff delay before retrying an error of this category.
    ///
    /// Rate limits get a long fixed pause; transient failures grow
    /// exponentially from a 5s base, capped at 60s.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        match self {
            ErrorCategory::RateLimit => Duration::from_secs(30),
            _ => {
                let secs = 5u64.saturating_mul(1 << attempt.min(4));
                Duration::from_secs(secs.min(60))
            }
        }
    }
}

/// Recommended recovery action carried to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Transient; the retry executor handles it
    Retry,
    /// Credential is gone; re-authenticate
    Reconnect,
    /// State is stale; re-fetch the affected view
    Refresh,
    /// Nothing automatic; surface the message
    None,
}

/// A classified failure. Immutable once created.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{user_message}")]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub http_status: Option<u16>,
    pub retryable: bool,
    pub user_message: String,
    pub action: RecoveryAction,
}

impl ClassifiedError {
    /// A classification for a caller-initiated cancellation. Never retried,
    /// never notified.
    pub fn cancelled() -> Self {
        Self {
            category: ErrorCategory::Unknown,
            http_status: None,
            retryable: false,
            user_message: "Operation cancelled".to_string(),
            action: RecoveryAction::None,
        }
    }
}

/// Classifies raw API errors, tracking windowed per-category occurrences.
pub struct ErrorClassifier {
    /// Occurrence counters; entries expire a fixed window after creation so
    /// a recovered error class is not penalized forever
    occurrences: Cache<ErrorCategory, Arc<AtomicU32>>,
    /// Occurrences within the window before a capped category stops
    /// classifying as retryable
    occurrence_cap: u32,
    /// Opt-in user-facing notifications
    notices: broadcast::Sender<String>,
}

impl ErrorClassifier {
    pub fn new(config: &GatewayConfig) -> Self {
        let occurrences = Cache::builder()
            .time_to_live(config.occurrence_window)
            .name("error_occurrence_window")
            .build();
        let (notices, _) = broadcast::channel(16);

        Self {
            occurrences,
            occurrence_cap: config.occurrence_cap,
            notices,
        }
    }

    /// Subscribe to user-facing error notifications. Only errors classified
    /// via [`Self::classify_and_notify`] are published here.
    pub fn subscribe_notices(&self) -> broadcast::Receiver<String> {
        self.notices.subscribe()
    }

    /// Classify a raw error. Never fails.
    pub fn classify(&self, raw: &ApiError) -> ClassifiedError {
        let classified = match raw {
            ApiError::RateLimited => self.build(
                ErrorCategory::RateLimit,
                raw,
                true,
                RecoveryAction::Retry,
                "The service is busy. Retrying shortly...",
            ),
            ApiError::QuotaExceeded(_) => self.build(
                ErrorCategory::QuotaExceeded,
                raw,
                false,
                RecoveryAction::None,
                "Storage or request quota exceeded. Try again later.",
            ),
            ApiError::AuthExpired => self.build(
                ErrorCategory::AuthExpired,
                raw,
                false,
                RecoveryAction::Reconnect,
                "Your session has expired. Please sign in again.",
            ),
            ApiError::Forbidden(_) => self.build(
                ErrorCategory::PermissionDenied,
                raw,
                false,
                RecoveryAction::Refresh,
                "You don't have permission for that item.",
            ),
            ApiError::NotFound(_) => self.build(
                ErrorCategory::NotFound,
                raw,
                false,
                RecoveryAction::Refresh,
                "That item no longer exists. Refreshing the view.",
            ),
            ApiError::Timeout => self.build_capped(
                ErrorCategory::Timeout,
                raw,
                "The request timed out. Retrying...",
            ),
            ApiError::Network(_) => self.build_capped(
                ErrorCategory::Network,
                raw,
                "Connection problem. Check your network.",
            ),
            ApiError::Server(_, _) => self.build_capped(
                ErrorCategory::Server,
                raw,
                "The service hit a problem. Retrying...",
            ),
            ApiError::Request(_) => self.build_capped(
                ErrorCategory::Unknown,
                raw,
                "Something went wrong. Retrying...",
            ),
            ApiError::Cancelled => ClassifiedError::cancelled(),
        };

        debug!(
            category = ?classified.category,
            retryable = classified.retryable,
            status = ?classified.http_status,
            "Classified API error"
        );
        classified
    }

    /// Classify and additionally publish the user-facing message to
    /// subscribers. Callers that surface errors themselves use
    /// [`Self::classify`] instead.
    pub fn classify_and_notify(&self, raw: &ApiError) -> ClassifiedError {
        let classified = self.classify(raw);
        if !matches!(raw, ApiError::Cancelled) {
            // No subscribers is fine
            let _ = self.notices.send(classified.user_message.clone());
        }
        classified
    }

    fn build(
        &self,
        category: ErrorCategory,
        raw: &ApiError,
        retryable: bool,
        action: RecoveryAction,
        user_message: &str,
    ) -> ClassifiedError {
        ClassifiedError {
            category,
            http_status: raw.http_status(),
            retryable,
            user_message: user_message.to_string(),
            action,
        }
    }

    /// Build a retryable classification subject to the occurrence cap.
    fn build_capped(
        &self,
        category: ErrorCategory,
        raw: &ApiError,
        user_message: &str,
    ) -> ClassifiedError {
        let count = self.record_occurrence(category);
        let retryable = count <= self.occurrence_cap;
        if !retryable {
            warn!(
                category = ?category,
                occurrences = count,
                cap = self.occurrence_cap,
                "Error category over occurrence cap, disabling automatic retry"
            );
        }
        let action = if retryable {
            RecoveryAction::Retry
        } else {
            RecoveryAction::None
        };
        self.build(category, raw, retryable, action, user_message)
    }

    /// Increment and return this category's occurrence count within the
    /// current window.
    fn record_occurrence(&self, category: ErrorCategory) -> u32 {
        let counter = self
            .occurrences
            .get_with(category, || Arc::new(AtomicU32::new(0)));
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}
