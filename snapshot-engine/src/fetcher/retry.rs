//! Retry and per-attempt expiry, layered over any [`Fetch`].

use super::Fetch;
use crate::config::FetchConfig;
use crate::utils::errors::FetchError;
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, warn};

/// Attempt budget and backoff schedule for one payload.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Each attempt expires after this long
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            attempt_timeout: config.timeout(),
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}

impl FetchError {
    /// Client errors other than 408/429 will not change on a retry.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::HttpStatus { status, .. } => {
                !(400..500).contains(status) || *status == 408 || *status == 429
            }
            FetchError::Network { .. } | FetchError::Timeout { .. } => true,
        }
    }
}

/// Wraps a fetch with retry, exponential backoff and attempt expiry.
pub struct Retrying<F> {
    inner: F,
    policy: RetryPolicy,
}

impl<F: Fetch> Retrying<F> {
    pub fn new(inner: F, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl<F: Fetch> Fetch for Retrying<F> {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let mut attempt = 1u32;
        loop {
            let result = match tokio::time::timeout(self.policy.attempt_timeout, self.inner.fetch(url)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout { url: url.to_string() }),
            };

            match result {
                Ok(bytes) => {
                    if attempt > 1 {
                        debug!("Fetched {} on attempt {}", url, attempt);
                    }
                    return Ok(bytes);
                }
                Err(e) if attempt < self.policy.max_attempts && e.is_transient() => {
                    let delay = self.policy.delay_after(attempt);
                    warn!(
                        "Fetch attempt {}/{} failed: {}. Retrying in {}ms",
                        attempt,
                        self.policy.max_attempts,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
