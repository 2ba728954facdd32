//! HTTP mapping of domain errors.
//!
//! Bodies are always `{ "error": <code>, "message": <text> }`, with extra
//! fields for credit and stream-cap rejections.

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use conclave_core::error::{AuthError, CouncilError, Error, QuotaError, StreamError};
use serde_json::{Value, json};
use tracing::error;

/// A domain error on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl<E> From<E> for ApiError
where
    E: Into<Error>,
{
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Council(CouncilError::Validation(_)) | Error::Stream(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::Auth(AuthError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Auth(_) => StatusCode::UNAUTHORIZED,
            Error::Quota(QuotaError::InsufficientCredits { .. }) => StatusCode::PAYMENT_REQUIRED,
            Error::Quota(QuotaError::RateLimited { .. } | QuotaError::TooManyStreams { .. }) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            Error::Council(CouncilError::TaskNotFound(_)) => StatusCode::NOT_FOUND,
            Error::Council(
                CouncilError::TaskCompleted(_)
                | CouncilError::NotProcessing { .. }
                | CouncilError::RoundConflict { .. },
            ) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for the body.
    pub fn code(&self) -> &'static str {
        match &self.0 {
            Error::Council(CouncilError::Validation(_)) => "invalid_request",
            Error::Stream(StreamError::Validation(_)) => "invalid_request",
            Error::Stream(StreamError::UnknownProvider(_)) => "unsupported_provider",
            Error::Auth(AuthError::Unavailable(_)) => "auth_unavailable",
            Error::Auth(_) => "unauthorized",
            Error::Quota(QuotaError::InsufficientCredits { .. }) => "insufficient_credits",
            Error::Quota(QuotaError::RateLimited { .. }) => "rate_limit",
            Error::Quota(QuotaError::TooManyStreams { .. }) => "too_many_streams",
            Error::Council(CouncilError::TaskNotFound(_)) => "not_found",
            Error::Council(CouncilError::TaskCompleted(_)) => "task_completed",
            Error::Council(CouncilError::NotProcessing { .. }) => "task_not_processing",
            Error::Council(CouncilError::RoundConflict { .. }) => "round_conflict",
            _ => "internal_error",
        }
    }

    fn body(&self) -> Value {
        let mut body = json!({ "error": self.code(), "message": self.0.to_string() });
        match &self.0 {
            Error::Quota(QuotaError::InsufficientCredits { balance, required }) => {
                body["balance"] = json!(balance);
                body["required"] = json!(required);
            }
            Error::Quota(QuotaError::RateLimited {
                retry_after_secs, ..
            }) => {
                body["retryAfter"] = json!(retry_after_secs);
            }
            Error::Quota(QuotaError::TooManyStreams { active, limit }) => {
                body["active"] = json!(active);
                body["limit"] = json!(limit);
            }
            _ => {}
        }
        body
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Error::Quota(QuotaError::RateLimited {
            retry_after_secs,
            limit,
            ..
        }) = &self.0
        {
            let reset = chrono::Utc::now().timestamp() + *retry_after_secs as i64;
            headers.insert("retry-after", HeaderValue::from(*retry_after_secs));
            headers.insert("x-ratelimit-limit", HeaderValue::from(*limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
            headers.insert("x-ratelimit-reset", HeaderValue::from(reset));
        }
        headers
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        (status, self.headers(), Json(self.body())).into_response()
    }
}
