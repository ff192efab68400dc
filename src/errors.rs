//! Raw API Error Types
//!
//! Structured failures from the remote storage API, built from HTTP status
//! codes, provider error codes, or transport errors. Free-text matching is
//! retained only as a lower-confidence fallback for providers that return
//! unstructured bodies.

use thiserror::Error;

/// Provider error code for a daily request quota being exhausted.
pub const CODE_RATE_LIMIT: &str = "rateLimitExceeded";
/// Provider error code for user-scoped rate limiting.
pub const CODE_USER_RATE_LIMIT: &str = "userRateLimitExceeded";
/// Provider error code for the daily usage quota.
pub const CODE_DAILY_QUOTA: &str = "dailyLimitExceeded";
/// Provider error code for the storage quota.
pub const CODE_STORAGE_QUOTA: &str = "storageQuotaExceeded";
/// Provider error code for an invalid or expired credential.
pub const CODE_INVALID_CREDENTIALS: &str = "authError";

/// Raw error from a remote API call.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("Rate limited — try again after backoff")]
    RateLimited,

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Authentication expired — credential needs refresh")]
    AuthExpired,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({0}): {1}")]
    Server(u16, String),

    #[error("Request error: {0}")]
    Request(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl ApiError {
    /// Create an error from an HTTP status code and response body.
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 => ApiError::AuthExpired,
            403 => ApiError::Forbidden(body.to_string()),
            404 => ApiError::NotFound(body.to_string()),
            408 => ApiError::Timeout,
            429 => ApiError::RateLimited,
            500..=599 => ApiError::Server(status, body.to_string()),
            _ => ApiError::Request(format!("HTTP {}: {}", status, body)),
        }
    }

    /// Create an error from a structured provider error code.
    ///
    /// Provider codes are checked before any status or text matching; they
    /// are the most reliable signal the API exposes.
    pub fn from_provider_code(code: &str, message: &str) -> Self {
        match code {
            CODE_RATE_LIMIT | CODE_USER_RATE_LIMIT => ApiError::RateLimited,
            CODE_DAILY_QUOTA | CODE_STORAGE_QUOTA => {
                ApiError::QuotaExceeded(message.to_string())
            }
            CODE_INVALID_CREDENTIALS => ApiError::AuthExpired,
            "insufficientFilePermissions" | "appNotAuthorizedToFile" => {
                ApiError::Forbidden(message.to_string())
            }
            "notFound" => ApiError::NotFound(message.to_string()),
            _ => ApiError::Request(format!("{}: {}", code, message)),
        }
    }

    /// Lower-confidence fallback: classify from free-form message text.
    ///
    /// Only used when neither a status code nor a provider code is
    /// available. Substring matching is fragile; prefer the structured
    /// constructors.
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("rate limit") || lower.contains("429") {
            ApiError::RateLimited
        } else if lower.contains("quota") {
            ApiError::QuotaExceeded(message.to_string())
        } else if lower.contains("401") || lower.contains("invalid credential") {
            ApiError::AuthExpired
        } else if lower.contains("timeout") || lower.contains("timed out") {
            ApiError::Timeout
        } else if lower.contains("network") || lower.contains("connect") {
            ApiError::Network(message.to_string())
        } else {
            ApiError::Request(message.to_string())
        }
    }

    /// HTTP status associated with this error, where one exists.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            ApiError::RateLimited => Some(429),
            ApiError::AuthExpired => Some(401),
            ApiError::Forbidden(_) => Some(403),
            ApiError::NotFound(_) => Some(404),
            ApiError::Timeout => Some(408),
            ApiError::Server(status, _) => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return ApiError::Timeout;
        }
        if let Some(status) = err.status() {
            return ApiError::from_status(status.as_u16(), &err.to_string());
        }
        if err.is_connect() || err.is_request() {
            return ApiError::Network(err.to_string());
        }
        ApiError::Request(err.to_string())
    }
}
