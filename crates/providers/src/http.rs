//! Request plumbing shared by the HTTP adapters.

use conclave_core::error::ProviderError;
use std::time::Duration;
use tracing::warn;

/// Build the HTTP client used by every adapter.
///
/// Only the connect phase is bounded here; whole-request and per-read
/// deadlines belong to the caller.
pub(crate) fn build_client() -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| ProviderError::Network(format!("Failed to create HTTP client: {e}")))
}

/// Send a request and map transport failures and non-success statuses.
pub(crate) async fn send(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, ProviderError> {
    let response = request.send().await.map_err(map_transport)?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    warn!(provider, status = status.as_u16(), body = %body, "Provider returned error");

    Err(match (ProviderError::from_status(status.as_u16(), body), retry_after) {
        (ProviderError::RateLimited { .. }, Some(secs)) => ProviderError::RateLimited {
            retry_after_secs: secs,
        },
        (err, _) => err,
    })
}

pub(crate) fn map_transport(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Map a body-parse failure on a 200 response.
pub(crate) fn parse_error(e: impl std::fmt::Display) -> ProviderError {
    ProviderError::ApiError {
        status_code: 200,
        message: format!("Failed to parse response: {e}"),
    }
}
