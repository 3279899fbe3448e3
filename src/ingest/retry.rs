// src/ingest/retry.rs
//! Bounded retry around a single bucket fetch.

use std::time::Duration;

use metrics::counter;

use crate::config::RetryConfig;
use crate::errors::{BucketUnavailable, FetchError};
use crate::ingest::types::{Bucket, NGramFeed, RawPayload};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Pause on a rate-limit signal without a server hint.
    pub rate_limit_pause: Duration,
    /// Rate-limit pauses allowed per bucket; they do not use up `max_attempts`.
    pub max_rate_limit_waits: u32,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            rate_limit_pause: Duration::from_secs(cfg.rate_limit_pause_secs),
            max_rate_limit_waits: cfg.max_rate_limit_waits,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Same attempt budget, zero sleeps.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            rate_limit_pause: Duration::ZERO,
            max_rate_limit_waits: 3,
        }
    }

    /// Delay after the `attempt`-th failed try (1-based): base * 2^(attempt-1), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }
}

/// Fetch one bucket, retrying transient failures with exponential backoff and
/// pausing on rate limits. Permanent failures give up at once.
pub async fn fetch_with_retry<F>(
    feed: &F,
    bucket: &Bucket,
    policy: &RetryPolicy,
) -> Result<RawPayload, BucketUnavailable>
where
    F: NGramFeed + ?Sized,
{
    let mut attempts: u32 = 0;
    let mut rate_limit_waits: u32 = 0;

    loop {
        match feed.fetch(bucket).await {
            Ok(payload) => return Ok(payload),
            Err(FetchError::RateLimited { retry_after }) => {
                if rate_limit_waits >= policy.max_rate_limit_waits {
                    return Err(BucketUnavailable {
                        bucket: *bucket,
                        attempts: attempts + rate_limit_waits,
                        reason: "still rate limited after pausing".to_string(),
                    });
                }
                rate_limit_waits += 1;
                let pause = retry_after.unwrap_or(policy.rate_limit_pause);
                tracing::warn!(
                    target: "ingest",
                    %bucket,
                    pause_ms = pause.as_millis() as u64,
                    provider = feed.name(),
                    "rate limited, pausing"
                );
                tokio::time::sleep(pause).await;
            }
            Err(FetchError::Permanent(reason)) => {
                return Err(BucketUnavailable {
                    bucket: *bucket,
                    attempts: attempts + 1,
                    reason,
                });
            }
            Err(FetchError::Transient(reason)) => {
                attempts += 1;
                if attempts >= policy.max_attempts {
                    return Err(BucketUnavailable {
                        bucket: *bucket,
                        attempts,
                        reason,
                    });
                }
                let delay = policy.backoff(attempts);
                counter!("ingest_fetch_retries_total").increment(1);
                tracing::debug!(
                    target: "ingest",
                    %bucket,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %reason,
                    "transient fetch failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
