//! Request Throttle
//!
//! Global admission gate for calls to the remote API: bounded concurrency
//! plus a minimum spacing between dispatches, to stay under the published
//! per-second rate limit. Admission is strict FIFO — tokio's semaphore
//! queues waiters fairly, and the dispatch clock is claimed in arrival
//! order. The throttle never fails; it only delays.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::trace;

use crate::config::GatewayConfig;

/// An admission slot. Held for the duration of one remote call; the slot is
/// released on drop, on every exit path including cancellation and error.
pub struct ThrottleTicket {
    _permit: OwnedSemaphorePermit,
}

/// FIFO admission gate with bounded concurrency and minimum call spacing.
pub struct RequestThrottle {
    permits: Arc<Semaphore>,
    concurrency: usize,
    min_spacing: Duration,
    /// Earliest instant the next call may be dispatched
    next_dispatch: Mutex<Instant>,
}

impl RequestThrottle {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.concurrency)),
            concurrency: config.concurrency,
            min_spacing: config.min_spacing,
            next_dispatch: Mutex::new(Instant::now()),
        }
    }

    /// Acquire an admission slot. Suspends until a slot is free and the
    /// minimum spacing since the previous dispatch has elapsed.
    ///
    /// Cancel-safe: dropping the future before it completes releases any
    /// partially acquired state.
    pub async fn admit(&self) -> ThrottleTicket {
        // Semaphore is never closed, so acquire cannot fail
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .expect("throttle semaphore closed");

        // Claim a dispatch slot on the spacing clock. The mutex is held
        // only long enough to advance the clock; the wait happens outside
        // it, so later arrivals queue behind this claim in order.
        let slot = {
            let mut next = self.next_dispatch.lock().await;
            let now = Instant::now();
            let slot = if *next > now { *next } else { now };
            *next = slot + self.min_spacing;
            slot
        };

        let now = Instant::now();
        if slot > now {
            trace!(wait_ms = (slot - now).as_millis() as u64, "Throttle spacing wait");
            tokio::time::sleep_until(slot).await;
        }

        ThrottleTicket { _permit: permit }
    }

    /// Number of admission slots currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Number of calls currently in flight.
    pub fn in_flight(&self) -> usize {
        self.concurrency - self.permits.available_permits()
    }
}
