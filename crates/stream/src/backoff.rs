use conclave_config::StreamingConfig;
use std::time::Duration;

/// Exponential reconnect delays: `base * 2^attempt`, capped at `max`,
/// for at most `max_retries` attempts.
///
/// No jitter, so consecutive delays never decrease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub max_retries: u32,
}

impl Backoff {
    pub fn from_config(config: &StreamingConfig) -> Self {
        Self {
            base: Duration::from_millis(config.backoff_base_ms),
            max: Duration::from_millis(config.backoff_max_ms),
            max_retries: config.max_retries,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay before retry `attempt`, or `None` once retries are spent.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_retries).then(|| self.delay_for(attempt))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&StreamingConfig::default())
    }
}
