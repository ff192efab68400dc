//! Session Events
//!
//! Broadcast notifications about session lifecycle changes, consumed by the
//! UI to route the user (re-authenticate, dismiss warnings, redirect).

use std::time::{SystemTime, UNIX_EPOCH};

/// What happened to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEventKind {
    /// Credential was refreshed proactively
    Refreshed,
    /// Credential is gone; re-authentication required
    Expired,
    /// A refresh attempt failed
    Error,
    /// Idle too long; logout countdown started
    InactivityWarning,
    /// Activity arrived during the countdown
    WarningDismissed,
    /// Countdown elapsed with no activity
    ForcedLogout,
}

/// A timestamped session event with an optional detail payload.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub kind: SessionEventKind,
    /// Seconds since the Unix epoch
    pub at: u64,
    pub detail: Option<String>,
}

impl SessionEvent {
    pub fn new(kind: SessionEventKind) -> Self {
        Self {
            kind,
            at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            detail: None,
        }
    }

    pub fn with_detail(kind: SessionEventKind, detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..Self::new(kind)
        }
    }
}
