//! Generic backoff/retry policy
//!
//! One policy object parameterized by the error taxonomy, reused by every
//! adapter-facing fetch loop and by the ingestion batcher. Replaces the
//! scattered per-source retry loops of ad-hoc designs.

use crate::config::RetryConfig;
use rand::Rng;
use std::time::Duration;

/// Exponential backoff with random jitter
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base_delay: Duration,
    max_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Delay before retry number `attempt` (0-based): base * 2^attempt,
    /// capped, plus up to 25% random jitter so that concurrent retriers
    /// do not stampede in lockstep.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(20)));
        let capped = exp.min(self.max_delay);
        let jitter_budget = capped.as_millis() as u64 / 4;
        let jitter = if jitter_budget > 0 {
            rand::thread_rng().gen_range(0..=jitter_budget)
        } else {
            0
        };
        capped + Duration::from_millis(jitter)
    }

    /// Sleep for the attempt's delay
    pub async fn wait(&self, attempt: u32) {
        tokio::time::sleep(self.delay_for(attempt)).await;
    }
}
