//! API registry error types.
//!
//! Errors are plain data so they can be stored in call history and compared
//! in tests. `is_retryable` drives the retry loop in `ApiRegistry::invoke`.

use thiserror::Error;

/// Substrings (lower-case) that mark a handler error as transient.
const RETRYABLE_MARKERS: [&str; 5] = ["timeout", "connection", "network", "unavailable", "busy"];

/// Errors returned by API registration and invocation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("API not found: {0}")]
    NotFound(String),

    #[error("API already registered: {0} (pass update to replace it)")]
    AlreadyRegistered(String),

    #[error("Invalid API name: {0}")]
    InvalidName(String),

    /// Every schema violation, not just the first.
    #[error("Parameter validation failed for {api}: {}", violations.join("; "))]
    ParameterValidation { api: String, violations: Vec<String> },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("API call timed out: {api} after {timeout_ms}ms")]
    Timeout { api: String, timeout_ms: u64 },

    /// Fast-fail from an open circuit. Not retried within the same call.
    #[error("Circuit breaker is open for {0}")]
    CircuitOpen(String),

    /// Raised by the handler or a middleware.
    #[error("{0}")]
    Handler(String),

    /// The call task was aborted or panicked.
    #[error("API call aborted: {0}")]
    Aborted(String),

    #[error("Token not found")]
    TokenNotFound,

    /// Bulk token revocation needs `force`.
    #[error("Revoking {count} tokens requires confirmation (force)")]
    ConfirmationRequired { count: usize },
}

impl ApiError {
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Timeout { .. } => true,
            ApiError::Handler(message) => {
                let lower = message.to_lowercase();
                RETRYABLE_MARKERS.iter().any(|m| lower.contains(m))
            }
            _ => false,
        }
    }

    /// Failures of the operation itself. Caller errors do not trip the
    /// circuit breaker.
    pub fn counts_against_circuit(&self) -> bool {
        matches!(
            self,
            ApiError::Handler(_) | ApiError::Timeout { .. } | ApiError::Aborted(_)
        )
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
