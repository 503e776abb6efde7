//! Per-source rate governor
//!
//! Token bucket (sustained rate + burst) built on the `governor` crate,
//! with a cooldown overlay for source-imposed backoff: a 429/503 from the
//! adapter opens a cooldown window during which no tokens are issued,
//! independent of the bucket's normal refill. Owned exclusively by its
//! source's job; never shared.

use crate::error::SyncError;
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

type DirectLimiter = governor::RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

pub struct RateGovernor {
    limiter: DirectLimiter,
    cooldown_until: Mutex<Option<Instant>>,
    /// Consecutive rate-limit signals since the last success; drives the
    /// exponential default when the source supplies no retry-after hint
    consecutive_limits: Mutex<u32>,
    default_cooldown: Duration,
    max_cooldown: Duration,
}

impl RateGovernor {
    pub fn new(rate_per_sec: u32, burst: u32) -> Self {
        let rate = NonZeroU32::new(rate_per_sec.max(1)).expect("max(1) is non-zero");
        let burst = NonZeroU32::new(burst.max(1)).expect("max(1) is non-zero");
        let quota = governor::Quota::per_second(rate).allow_burst(burst);

        Self {
            limiter: governor::RateLimiter::direct(quota),
            cooldown_until: Mutex::new(None),
            consecutive_limits: Mutex::new(0),
            default_cooldown: Duration::from_secs(2),
            max_cooldown: Duration::from_secs(300),
        }
    }

    /// Acquire one token, suspending cooperatively until it is available
    /// or the deadline passes.
    ///
    /// Any active cooldown window is waited out first; the deadline covers
    /// the whole wait.
    pub async fn acquire(&self, deadline: Duration) -> Result<(), SyncError> {
        let acquire = async {
            loop {
                let wait_until = { *self.cooldown_until.lock().await };
                match wait_until {
                    Some(until) if until > Instant::now() => {
                        tokio::time::sleep_until(until).await;
                    }
                    _ => break,
                }
            }
            self.limiter.until_ready().await;
        };

        tokio::time::timeout(deadline, acquire)
            .await
            .map_err(|_| SyncError::Transient("rate governor token acquisition timed out".into()))
    }

    /// Record a RateLimited signal from the adapter
    ///
    /// The cooldown window is the source's hint when present, otherwise an
    /// exponential default that doubles with each consecutive signal.
    pub async fn report_rate_limited(&self, hint: Option<Duration>) -> Duration {
        let mut consecutive = self.consecutive_limits.lock().await;
        *consecutive = consecutive.saturating_add(1);

        let window = match hint {
            Some(hint) => hint.min(self.max_cooldown),
            None => {
                let exp = self
                    .default_cooldown
                    .saturating_mul(2u32.saturating_pow((*consecutive - 1).min(10)));
                exp.min(self.max_cooldown)
            }
        };

        let mut cooldown = self.cooldown_until.lock().await;
        *cooldown = Some(Instant::now() + window);

        tracing::debug!(cooldown_ms = window.as_millis() as u64, "Rate limit cooldown set");
        window
    }

    /// Record a successful fetch; resets the exponential default
    pub async fn report_success(&self) {
        *self.consecutive_limits.lock().await = 0;
    }
}
