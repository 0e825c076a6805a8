//! Retry combinator for remote calls
//!
//! Every remote metadata, listing and copy call made by the object-store
//! file system goes through [`retry`]. The policy decides whether a failure
//! is retried and how long to wait; the final error is returned unchanged,
//! translation into `NotFound` and friends happens in the caller.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::error::{VfsError, VfsResult};

/// Decides whether (and after how long) a failed attempt is retried
pub trait RetryPolicy: Send + Sync + std::fmt::Debug {
    /// Delay before retry number `attempt` (1-based) after `err`, or `None` to give up
    fn delay_for(&self, attempt: u32, err: &VfsError) -> Option<Duration>;
}

/// Pass-through policy: the operation runs exactly once
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn delay_for(&self, _attempt: u32, _err: &VfsError) -> Option<Duration> {
        None
    }
}

/// Fixed number of retries with a constant delay, for retryable errors only
#[derive(Debug, Clone, Copy)]
pub struct FixedAttempts {
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy for FixedAttempts {
    fn delay_for(&self, attempt: u32, err: &VfsError) -> Option<Duration> {
        (attempt <= self.retries && err.is_retryable()).then_some(self.delay)
    }
}

/// Exponential backoff (2^n) capped at `max_delay`, with optional jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl ExponentialBackoff {
    pub fn new(retries: u32) -> Self {
        Self {
            retries,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay for a given attempt number, before jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(2_u32.pow(exp))
            .min(self.max_delay)
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn delay_for(&self, attempt: u32, err: &VfsError) -> Option<Duration> {
        if attempt > self.retries || !err.is_retryable() {
            return None;
        }
        let delay = self.base_delay(attempt);
        if self.jitter {
            let factor = rand::rng().random_range(0.0..0.3);
            Some(delay + Duration::from_secs_f64(delay.as_secs_f64() * factor))
        } else {
            Some(delay)
        }
    }
}

/// Run `operation`, retrying per `policy`
///
/// The operation is a zero-argument closure producing a fresh future per
/// attempt. Returns the first success, or the last error once the policy
/// gives up.
pub async fn retry<P, F, Fut, T>(policy: &P, mut operation: F) -> VfsResult<T>
where
    P: RetryPolicy + ?Sized,
    F: FnMut() -> Fut,
    Fut: Future<Output = VfsResult<T>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempt += 1;
                match policy.delay_for(attempt, &e) {
                    Some(delay) => {
                        debug!(attempt, ?delay, error = %e, "retrying remote call");
                        sleep(delay).await;
                    }
                    None => return Err(e),
                }
            }
        }
    }
}
