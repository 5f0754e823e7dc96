//! Centralized retry policy for external calls.
//!
//! Every network-facing wrapper (order placement, reconciliation fetch,
//! feed reconnect) shares this one policy object instead of growing its
//! own ad hoc backoff loop. Delays grow exponentially from `base_delay`,
//! are capped at `max_delay`, and carry random jitter so concurrent loops
//! do not retry in lockstep.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
        }
    }

    /// Exponential delay for the given 1-based attempt number, before jitter.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let exp = self
            .base_delay
            .saturating_mul(1u32.checked_shl(shift).unwrap_or(u32::MAX));
        exp.min(self.max_delay)
    }

    /// Delay for the given attempt with jitter applied, up to +50%.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt);
        let base_ms = base.as_millis() as u64;
        if base_ms == 0 {
            return base;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=base_ms / 2);
        base + Duration::from_millis(jitter_ms)
    }

    /// Run `op`, retrying retryable errors with backoff until the attempt
    /// budget is exhausted. The final error is returned unchanged.
    pub async fn run<T, E, Fut, Op, Retryable>(
        &self,
        label: &str,
        is_retryable: Retryable,
        mut op: Op,
    ) -> std::result::Result<T, E>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
        Retryable: Fn(&E) -> bool,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts && is_retryable(&err) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        label, attempt, self.max_attempts, delay, err
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Bound a fallible future, converting elapsed time into the caller's own
/// timeout error. A timeout is a recoverable failure, never a silent
/// success.
pub async fn timeout_or<T, E, Fut, OnTimeout>(
    duration: Duration,
    fut: Fut,
    on_timeout: OnTimeout,
) -> std::result::Result<T, E>
where
    Fut: Future<Output = std::result::Result<T, E>>,
    OnTimeout: FnOnce(u64) -> E,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout(duration.as_millis() as u64)),
    }
}
