//! Retry with exponential backoff for model service calls.
//!
//! Only errors for which [`Error::is_transient`] holds are retried. The
//! delay between attempts is produced by [`RetryPolicy::delay_for_attempt`]
//! and awaited through a [`Sleeper`], so tests can swap in
//! [`RecordingSleeper`] and run without a clock.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use caseforge_core::defaults;
use caseforge_core::{Error, Result};

/// Configuration for retry behavior with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first call. Always at least 1.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay before jitter.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each retry.
    pub backoff_factor: f64,
    /// Random jitter range as a fraction of the delay (0.2 = ±20%).
    pub jitter_percent: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::RETRY_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(defaults::RETRY_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(defaults::RETRY_MAX_DELAY_MS),
            backoff_factor: defaults::RETRY_BACKOFF_FACTOR,
            jitter_percent: defaults::RETRY_JITTER_PERCENT as f64 / 100.0,
        }
    }
}

impl RetryPolicy {
    /// Create a policy, clamping values into their valid ranges.
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
        jitter_percent: f64,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay: max_delay.max(initial_delay),
            backoff_factor: backoff_factor.max(1.0),
            jitter_percent: jitter_percent.clamp(0.0, 1.0),
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Create from environment variables.
    ///
    /// - `RETRY_MAX_ATTEMPTS`
    /// - `RETRY_INITIAL_DELAY_MS`
    /// - `RETRY_MAX_DELAY_MS`
    pub fn from_env() -> Self {
        fn env_u64(key: &str) -> Option<u64> {
            std::env::var(key).ok().and_then(|v| v.parse().ok())
        }

        let base = Self::default();
        Self::new(
            env_u64("RETRY_MAX_ATTEMPTS")
                .map(|v| v.min(u32::MAX as u64) as u32)
                .unwrap_or(base.max_attempts),
            env_u64("RETRY_INITIAL_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(base.initial_delay),
            env_u64("RETRY_MAX_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(base.max_delay),
            base.backoff_factor,
            base.jitter_percent,
        )
    }

    /// Same policy without jitter. Delays become exact.
    pub fn without_jitter(mut self) -> Self {
        self.jitter_percent = 0.0;
        self
    }

    /// Delay to wait after the given failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let initial_ms = self.initial_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        // 2^31 already exceeds any practical delay
        let exp = attempt.min(31) as i32;
        let base_ms = (initial_ms * self.backoff_factor.powi(exp)).min(max_ms);

        let jitter = if self.jitter_percent > 0.0 && base_ms > 0.0 {
            let range = base_ms * self.jitter_percent;
            rand::thread_rng().gen_range(-range..=range)
        } else {
            0.0
        };

        Duration::from_millis((base_ms + jitter).max(0.0) as u64)
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out.
    ///
    /// The last error is returned unchanged, so an exhausted transient
    /// failure stays transient.
    pub async fn run<T, F, Fut>(&self, sleeper: &dyn Sleeper, op: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(op, total_attempts = attempt + 1, "Operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        warn!(
                            op,
                            attempt,
                            max_attempts = self.max_attempts,
                            error = %e,
                            "Operation failed after all retry attempts"
                        );
                        return Err(e);
                    }
                    let delay = self.delay_for_attempt(attempt - 1);
                    debug!(
                        op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying operation after transient failure"
                    );
                    sleeper.sleep(delay).await;
                }
            }
        }
    }
}

/// Waits between retry attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Sleeper that returns immediately and records every requested delay.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(duration);
        }
    }
}

/// Convert an elapsed per-call timeout into a transient error.
pub async fn with_timeout<T, Fut>(timeout: Duration, op: &str, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::TransientService(format!(
            "{} timed out after {}ms",
            op,
            timeout.as_millis()
        ))),
    }
}
