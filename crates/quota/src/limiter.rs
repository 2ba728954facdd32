//! Sliding-window rate limiter backed by the shared store.

use chrono::{DateTime, Utc};
use conclave_config::RateLimitConfig;
use conclave_core::error::{QuotaError, StoreError};
use conclave_core::ledger::RateDecision;
use conclave_core::store::RateLimitStore;
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-endpoint request limiter.
///
/// Window length and maximum come from `[rate_limit]`, with per-endpoint
/// overrides. The counting itself is a single atomic store operation.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    /// Count one request and report the decision without failing on
    /// rejection.
    pub async fn check(&self, identifier: &str, endpoint: &str) -> Result<RateDecision, StoreError> {
        self.check_at(identifier, endpoint, Utc::now()).await
    }

    pub async fn check_at(
        &self,
        identifier: &str,
        endpoint: &str,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, StoreError> {
        let window = self.config.for_endpoint(endpoint);
        let decision = self
            .store
            .hit(identifier, endpoint, window.window_secs, window.max_requests, now)
            .await?;

        debug!(
            identifier,
            endpoint,
            allowed = decision.allowed,
            remaining = decision.remaining,
            "Rate limit check"
        );
        Ok(decision)
    }

    /// Count one request, turning a rejection into `QuotaError::RateLimited`.
    pub async fn enforce(&self, identifier: &str, endpoint: &str) -> Result<RateDecision, QuotaError> {
        let decision = self.check(identifier, endpoint).await?;
        if decision.allowed {
            return Ok(decision);
        }

        let retry_after_secs = decision.retry_after_secs.unwrap_or(decision.reset_after_secs);
        warn!(identifier, endpoint, retry_after_secs, "Rate limit exceeded");
        Err(QuotaError::RateLimited {
            endpoint: endpoint.to_string(),
            retry_after_secs,
            limit: decision.limit,
        })
    }
}
