//! API Gateway
//!
//! The only sanctioned way business logic reaches the remote API: composes
//! the session gate, request throttle, retry executor, and error classifier
//! behind a single `call`.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::classify::{ClassifiedError, ErrorCategory, ErrorClassifier, RecoveryAction};
use crate::config::GatewayConfig;
use crate::errors::ApiError;
use crate::retry::RetryExecutor;
use crate::session::SessionGuardian;
use crate::throttle::RequestThrottle;

/// Composed throttle + retry + classification front door to the remote API.
pub struct ApiGateway {
    classifier: Arc<ErrorClassifier>,
    throttle: Arc<RequestThrottle>,
    retry: RetryExecutor,
    session: Option<Arc<SessionGuardian>>,
}

impl ApiGateway {
    pub fn new(config: GatewayConfig) -> Self {
        let classifier = Arc::new(ErrorClassifier::new(&config));
        let throttle = Arc::new(RequestThrottle::new(&config));
        let retry = RetryExecutor::new(&config, Arc::clone(&classifier), Arc::clone(&throttle));
        Self {
            classifier,
            throttle,
            retry,
            session: None,
        }
    }

    /// Attach a session guardian. Calls then record activity, proactively
    /// refresh the credential, and are refused once the session is gone.
    pub fn with_session(mut self, session: Arc<SessionGuardian>) -> Self {
        self.session = Some(session);
        self
    }

    /// Execute a remote operation through admission control and retry.
    pub async fn call<F, Fut, T>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<T, ClassifiedError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        if let Some(session) = &self.session {
            if !session.extend_for_operation(operation).await {
                debug!(operation, "Call refused: session credential unusable");
                return Err(ClassifiedError {
                    category: ErrorCategory::AuthExpired,
                    http_status: Some(401),
                    retryable: false,
                    user_message: "Your session has expired. Please sign in again.".to_string(),
                    action: RecoveryAction::Reconnect,
                });
            }
        }

        self.retry.execute(operation, cancel, f).await
    }

    /// The shared classifier, for callers that need to classify errors from
    /// paths outside the gateway (and for notice subscriptions).
    pub fn classifier(&self) -> &Arc<ErrorClassifier> {
        &self.classifier
    }

    /// The shared throttle, exposed for introspection.
    pub fn throttle(&self) -> &Arc<RequestThrottle> {
        &self.throttle
    }
}
