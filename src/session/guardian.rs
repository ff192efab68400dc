//! Session Guardian
//!
//! Owns the process-wide session state: last activity, inactivity phase,
//! and credential refresh. A periodic tick refreshes the credential when
//! its remaining lifetime drops below a threshold; a second tick walks
//! Active -> InactivityWarning -> ForcedLogout when no activity arrives.
//! Refresh is serialized — concurrent callers await the single in-flight
//! result. A failed refresh terminates the session instead of retrying,
//! so a stuck invalid credential never hammers the remote API.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::errors::ApiError;

use super::events::{SessionEvent, SessionEventKind};

/// Source of the access credential. Injected so tests control lifetimes and
/// refresh outcomes.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Remaining lifetime of the current credential; None when there is no
    /// usable credential at all.
    async fn remaining_lifetime(&self) -> Option<Duration>;

    /// Obtain a fresh credential from the provider.
    async fn refresh(&self) -> Result<(), ApiError>;
}

/// Inactivity phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Active,
    InactivityWarning,
    LoggedOut,
}

/// Read-only view of the current session state.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub idle_for: Duration,
    pub refresh_in_flight: bool,
}

struct SessionState {
    phase: SessionPhase,
    last_activity: Instant,
    warning_started: Option<Instant>,
    refresh_in_flight: bool,
    credential_gone: bool,
}

/// Activity tracking, proactive refresh, and inactivity enforcement.
pub struct SessionGuardian {
    credentials: Arc<dyn CredentialSource>,
    config: SessionConfig,
    state: Mutex<SessionState>,
    /// Serializes refresh attempts; holders re-check lifetime after
    /// acquiring so followers reuse the leader's result
    refresh_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionGuardian {
    pub fn new(credentials: Arc<dyn CredentialSource>, config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            credentials,
            config,
            state: Mutex::new(SessionState {
                phase: SessionPhase::Active,
                last_activity: Instant::now(),
                warning_started: None,
                refresh_in_flight: false,
                credential_gone: false,
            }),
            refresh_lock: tokio::sync::Mutex::new(()),
            events,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Start the refresh and inactivity timers. Call [`Self::shutdown`] to
    /// stop them.
    pub fn start(self: &Arc<Self>) {
        let refresh = {
            let guardian = Arc::clone(self);
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(guardian.config.refresh_check_interval);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tick.tick().await;
                    if guardian.phase() == SessionPhase::LoggedOut {
                        continue;
                    }
                    guardian.check_and_refresh().await;
                }
            })
        };

        let inactivity = {
            let guardian = Arc::clone(self);
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(guardian.config.inactivity_check_interval);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tick.tick().await;
                    guardian.evaluate_inactivity();
                }
            })
        };

        self.tasks.lock().unwrap().extend([refresh, inactivity]);
        info!("Session guardian started");
    }

    /// Stop the timers. State is left intact for inspection.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        debug!("Session guardian stopped");
    }

    /// Record a user interaction. Dismisses a pending inactivity warning.
    pub fn record_activity(&self) {
        let dismissed = {
            let mut state = self.state.lock().unwrap();
            if state.phase == SessionPhase::LoggedOut {
                return;
            }
            state.last_activity = Instant::now();
            if state.phase == SessionPhase::InactivityWarning {
                state.phase = SessionPhase::Active;
                state.warning_started = None;
                true
            } else {
                false
            }
        };
        if dismissed {
            self.emit(SessionEvent::new(SessionEventKind::WarningDismissed));
        }
    }

    /// Record activity and make sure the credential is usable for a
    /// long-running operation. Returns false when the session cannot
    /// proceed.
    pub async fn extend_for_operation(&self, name: &str) -> bool {
        debug!(operation = name, "Extending session for operation");
        self.record_activity();
        self.check_and_refresh().await
    }

    /// Refresh the credential if its remaining lifetime is below the
    /// threshold. Returns whether the credential is usable afterwards.
    ///
    /// Only one refresh runs at a time; concurrent callers wait for it and
    /// observe its outcome via the post-acquire lifetime re-check.
    pub async fn check_and_refresh(&self) -> bool {
        {
            let state = self.state.lock().unwrap();
            if state.credential_gone || state.phase == SessionPhase::LoggedOut {
                return false;
            }
        }

        match self.credentials.remaining_lifetime().await {
            Some(remaining) if remaining > self.config.refresh_threshold => return true,
            Some(_) => {}
            None => {
                self.fail_session("no credential available");
                return false;
            }
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while this one waited
        match self.credentials.remaining_lifetime().await {
            Some(remaining) if remaining > self.config.refresh_threshold => return true,
            Some(_) => {}
            None => {
                self.fail_session("no credential available");
                return false;
            }
        }

        self.state.lock().unwrap().refresh_in_flight = true;
        info!("Refreshing access credential");
        let result = self.credentials.refresh().await;
        self.state.lock().unwrap().refresh_in_flight = false;

        match result {
            Ok(()) => {
                self.emit(SessionEvent::new(SessionEventKind::Refreshed));
                true
            }
            Err(e) => {
                warn!(error = %e, "Credential refresh failed, terminating session");
                self.emit(SessionEvent::with_detail(SessionEventKind::Error, e.to_string()));
                self.fail_session("credential refresh failed");
                false
            }
        }
    }

    /// Mark the session signed out. Timers keep running but take no
    /// further action until [`Self::reset`].
    pub fn sign_out(&self) {
        let mut state = self.state.lock().unwrap();
        state.phase = SessionPhase::LoggedOut;
        state.warning_started = None;
    }

    /// Reset to a fresh active session after re-authentication.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.phase = SessionPhase::Active;
        state.last_activity = Instant::now();
        state.warning_started = None;
        state.refresh_in_flight = false;
        state.credential_gone = false;
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.lock().unwrap().phase
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock().unwrap();
        SessionSnapshot {
            phase: state.phase,
            idle_for: state.last_activity.elapsed(),
            refresh_in_flight: state.refresh_in_flight,
        }
    }

    /// One inactivity-timer step: enter the warning after the idle period,
    /// force logout when the countdown runs out.
    fn evaluate_inactivity(&self) {
        let event = {
            let mut state = self.state.lock().unwrap();
            let now = Instant::now();
            match state.phase {
                SessionPhase::Active => {
                    if now.duration_since(state.last_activity) >= self.config.idle_timeout {
                        state.phase = SessionPhase::InactivityWarning;
                        state.warning_started = Some(now);
                        Some(SessionEvent::new(SessionEventKind::InactivityWarning))
                    } else {
                        None
                    }
                }
                SessionPhase::InactivityWarning => match state.warning_started {
                    Some(started)
                        if now.duration_since(started) >= self.config.warning_countdown =>
                    {
                        state.phase = SessionPhase::LoggedOut;
                        state.warning_started = None;
                        Some(SessionEvent::new(SessionEventKind::ForcedLogout))
                    }
                    _ => None,
                },
                SessionPhase::LoggedOut => None,
            }
        };
        if let Some(event) = event {
            info!(kind = ?event.kind, "Inactivity transition");
            self.emit(event);
        }
    }

    fn fail_session(&self, reason: &str) {
        {
            let mut state = self.state.lock().unwrap();
            if state.credential_gone {
                return;
            }
            state.credential_gone = true;
        }
        self.emit(SessionEvent::with_detail(SessionEventKind::Expired, reason));
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl Drop for SessionGuardian {
    fn drop(&mut self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}
