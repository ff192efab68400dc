//! Retry Executor
//!
//! Wraps a unit of remote work with bounded retries. Failures are classified
//! first; non-retryable categories propagate immediately, retryable ones wait
//! a category-specific backoff and try again, up to the attempt cap. Every
//! attempt — including the eventually-successful one — passes through the
//! request throttle, so retries never bypass admission control.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::classify::{ClassifiedError, ErrorClassifier};
use crate::config::GatewayConfig;
use crate::errors::ApiError;
use crate::throttle::RequestThrottle;

/// Executes operations with classification-driven retry and backoff.
pub struct RetryExecutor {
    classifier: Arc<ErrorClassifier>,
    throttle: Arc<RequestThrottle>,
    max_attempts: u32,
    call_timeout: Duration,
}

impl RetryExecutor {
    pub fn new(
        config: &GatewayConfig,
        classifier: Arc<ErrorClassifier>,
        throttle: Arc<RequestThrottle>,
    ) -> Self {
        Self {
            classifier,
            throttle,
            max_attempts: config.max_attempts.max(1),
            call_timeout: config.call_timeout,
        }
    }

    /// Execute `f` with retries. Fails with the last classified error after
    /// exhausting attempts, or immediately on a non-retryable failure.
    ///
    /// The cancellation signal is checked before each attempt and while
    /// sleeping between attempts; a cancelled execution releases its
    /// admission slot and returns without scheduling further work.
    pub async fn execute<F, Fut, T>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<T, ClassifiedError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        for attempt in 0..self.max_attempts {
            if cancel.is_cancelled() {
                debug!(operation, "Operation cancelled before attempt");
                return Err(ClassifiedError::cancelled());
            }

            // Admission control applies to every attempt. The ticket is
            // released when the attempt finishes, success or failure.
            let ticket = tokio::select! {
                ticket = self.throttle.admit() => ticket,
                _ = cancel.cancelled() => {
                    debug!(operation, "Operation cancelled while queued");
                    return Err(ClassifiedError::cancelled());
                }
            };

            let outcome = tokio::select! {
                outcome = tokio::time::timeout(self.call_timeout, f()) => {
                    match outcome {
                        Ok(result) => result,
                        Err(_) => Err(ApiError::Timeout),
                    }
                }
                _ = cancel.cancelled() => {
                    debug!(operation, "Operation cancelled in flight");
                    return Err(ClassifiedError::cancelled());
                }
            };
            drop(ticket);

            let raw = match outcome {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(operation, attempt = attempt + 1, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(raw) => raw,
            };

            let classified = self.classifier.classify(&raw);
            let last_attempt = attempt + 1 >= self.max_attempts;
            if !classified.retryable || last_attempt {
                warn!(
                    operation,
                    attempt = attempt + 1,
                    category = ?classified.category,
                    retryable = classified.retryable,
                    error = %raw,
                    "Operation failed, not retrying"
                );
                return Err(classified);
            }

            let delay = classified.category.backoff_delay(attempt);
            warn!(
                operation,
                attempt = attempt + 1,
                max = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %raw,
                "Retrying operation after backoff"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    debug!(operation, "Operation cancelled during backoff");
                    return Err(ClassifiedError::cancelled());
                }
            }
        }

        unreachable!("retry loop always returns within max_attempts")
    }
}
