//! Error types for the retrieval core

use thiserror::Error;

/// Result type alias for retrieval-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the retrieval core
///
/// Every public operation either returns a value or fails with one of these
/// kinds. Transient kinds (`RateLimited`) are resolved by the retry executor
/// where possible; the rest surface to the caller unchanged.
#[derive(Debug, Error)]
pub enum Error {
    /// Connectivity is down or a transport-level failure occurred
    #[error("Network unavailable{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    NetworkUnavailable { reason: Option<String> },

    /// The backend asked us to slow down (HTTP 429 or equivalent)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The API quota for the billing period is used up
    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),

    /// A chat call was made before the session was started
    #[error("Session not initialized: start a session before sending messages")]
    SessionNotInitialized,

    /// The backend answered but produced no usable content
    #[error("No response from backend: {0}")]
    NoResponse(String),

    /// A backend response did not match the expected JSON shape
    #[error("Parse failed: {0}")]
    ParseFailed(String),

    /// The chunk store was unreachable or returned malformed rows
    #[error("Storage read failed: {0}")]
    StorageReadFailed(String),

    /// Invalid injected configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a network error with a reason
    pub fn network(reason: impl Into<String>) -> Self {
        Self::NetworkUnavailable {
            reason: Some(reason.into()),
        }
    }

    /// Create a network error with no further detail
    pub fn offline() -> Self {
        Self::NetworkUnavailable { reason: None }
    }

    /// Create a rate-limit error
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited(message.into())
    }

    /// Create a quota error
    pub fn quota(message: impl Into<String>) -> Self {
        Self::QuotaExhausted(message.into())
    }

    /// Create a no-response error
    pub fn no_response(message: impl Into<String>) -> Self {
        Self::NoResponse(message.into())
    }

    /// Create a parse error
    pub fn parse_failed(message: impl Into<String>) -> Self {
        Self::ParseFailed(message.into())
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageReadFailed(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether the retry executor may attempt this operation again
    ///
    /// Quota, session, and connectivity failures never recover within one
    /// request window, so retrying them only wastes the budget.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

/// Classify a raw failure message into the error taxonomy
///
/// Content matching mirrors what the backends actually put in failure bodies:
/// quota wording wins over rate wording because quota failures from the
/// generative API arrive as 429s with "quota" in the body.
pub fn normalize_error(message: impl Into<String>) -> Error {
    let message = message.into();
    let lower = message.to_lowercase();

    if lower.contains("quota") || lower.contains("limit") {
        Error::QuotaExhausted(message)
    } else if lower.contains("rate") || lower.contains("429") {
        Error::RateLimited(message)
    } else {
        // Timeouts, transport failures, and anything unclassified
        Error::network(message)
    }
}

impl Error {
    /// Classify a transport error from the HTTP client
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::network(err.to_string())
        } else {
            normalize_error(err.to_string())
        }
    }
}
