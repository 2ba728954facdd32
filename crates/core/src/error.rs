//! Error types for the Conclave domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Conclave operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Persistence errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Rate limit / credit errors ---
    #[error("Quota error: {0}")]
    Quota(#[from] QuotaError),

    // --- Deliberation errors ---
    #[error("Council error: {0}")]
    Council(#[from] CouncilError),

    // --- Streaming errors ---
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    // --- Identity errors ---
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether a fresh request has a reasonable chance of succeeding.
    ///
    /// Transient transport failures, upstream throttling and 5xx responses
    /// are retryable. Credential, request-shape and configuration problems
    /// will fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. }
            | Self::StreamInterrupted(_)
            | Self::Timeout(_)
            | Self::Network(_) => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            Self::AuthenticationFailed(_)
            | Self::InvalidRequest(_)
            | Self::ModelNotFound(_)
            | Self::NotConfigured(_) => false,
        }
    }

    /// Stable machine-readable code carried in stream error frames.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ApiError { .. } => "provider_error",
            Self::RateLimited { .. } => "rate_limit",
            Self::AuthenticationFailed(_) => "unauthorized",
            Self::InvalidRequest(_) => "invalid_request",
            Self::ModelNotFound(_) => "model_not_found",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::NotConfigured(_) => "not_configured",
            Self::Timeout(_) => "timeout",
            Self::Network(_) => "network",
        }
    }

    /// Map a non-success HTTP status from a model backend to an error.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ),
            404 => Self::ModelNotFound(body),
            408 => Self::Timeout(body),
            429 => Self::RateLimited {
                retry_after_secs: 5,
            },
            400..=499 => Self::InvalidRequest(body),
            _ => Self::ApiError {
                status_code: status,
                message: body,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Concurrent modification of {0}")]
    Conflict(String),
}

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("Rate limit exceeded for {endpoint}, retry after {retry_after_secs}s")]
    RateLimited {
        endpoint: String,
        retry_after_secs: u64,
        limit: u32,
    },

    #[error("Insufficient credits: need {required}, have {balance}")]
    InsufficientCredits { balance: i64, required: i64 },

    #[error("Too many concurrent streams: {active} active, limit {limit}")]
    TooManyStreams { active: u32, limit: u32 },

    #[error("Ledger storage failure: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum CouncilError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task {0} is already completed")]
    TaskCompleted(String),

    #[error("Task {task_id} is {status}, expected processing")]
    NotProcessing { task_id: String, status: String },

    #[error("Round {round} of task {task_id} was advanced concurrently")]
    RoundConflict { task_id: String, round: u32 },
}

/// Rejections raised before a stream is opened.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Provider '{0}' does not support streaming")]
    UnknownProvider(String),
}

#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingToken,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Identity service unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 503,
            message: "Service unavailable".into(),
        });
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("Service unavailable"));
    }

    #[test]
    fn retryable_classification() {
        assert!(ProviderError::RateLimited { retry_after_secs: 1 }.is_retryable());
        assert!(ProviderError::Network("reset".into()).is_retryable());
        assert!(ProviderError::Timeout("read".into()).is_retryable());
        assert!(ProviderError::StreamInterrupted("eof".into()).is_retryable());
        assert!(
            ProviderError::ApiError {
                status_code: 502,
                message: "bad gateway".into()
            }
            .is_retryable()
        );

        assert!(!ProviderError::AuthenticationFailed("bad key".into()).is_retryable());
        assert!(!ProviderError::InvalidRequest("bad json".into()).is_retryable());
        assert!(!ProviderError::NotConfigured("openai".into()).is_retryable());
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            ProviderError::from_status(401, String::new()),
            ProviderError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            ProviderError::from_status(429, String::new()),
            ProviderError::RateLimited { .. }
        ));
        assert!(matches!(
            ProviderError::from_status(400, "bad".into()),
            ProviderError::InvalidRequest(_)
        ));
        assert_eq!(ProviderError::from_status(500, "boom".into()).code(), "provider_error");
    }

    #[test]
    fn quota_error_displays_amounts() {
        let err = Error::Quota(QuotaError::InsufficientCredits {
            balance: 2,
            required: 3,
        });
        assert!(err.to_string().contains("need 3"));
        assert!(err.to_string().contains("have 2"));
    }
}
