//! Exponential backoff around unreliable external calls.
//!
//! Only failures [`DecisionError::is_retryable`] accepts are retried; anything
//! else is returned from [`RetryPolicy::run`] as soon as it happens.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{DecisionError, ExhaustedRetries, Result};

/// Attempts/backoff/jitter knobs shared by every external collaborator.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    /// Fraction of each wait added as uniform random jitter; 0 disables it.
    #[serde(default)]
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 5_000,
            backoff_factor: 2.0,
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay_ms: base_delay.as_millis() as u64,
            backoff_factor,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// A policy that calls the operation exactly once.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO, 1.0)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Wait after the `attempt`-th consecutive failure: `base * factor^attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay().as_secs_f64() * self.backoff_factor.powi(exponent);
        let wait = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
        if self.jitter > 0.0 {
            let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
            let extra = Duration::try_from_secs_f64(wait.as_secs_f64() * extra).unwrap_or_default();
            wait.saturating_add(extra)
        } else {
            wait
        }
    }

    /// Run `op` until it succeeds, the attempt ceiling is hit, or `cancel` fires.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt: u32 = 1;
        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(operation)),
                res = op() => res,
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", operation, attempt);
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_retryable() => {
                    debug!("{} failed on attempt {}, not retrying: {}", operation, attempt, err);
                    return Err(err);
                }
                Err(err) => err,
            };

            if attempt >= max_attempts {
                warn!(
                    "{} failed {} consecutive times, giving up: {}",
                    operation, attempt, err
                );
                return Err(ExhaustedRetries {
                    operation: operation.to_string(),
                    attempts: attempt,
                    last_error: Box::new(err),
                }
                .into());
            }

            let wait = self.delay_for_attempt(attempt);
            warn!(
                "{} attempt {}/{} failed: {}. Retrying in {}ms...",
                operation,
                attempt,
                max_attempts,
                err,
                wait.as_millis()
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(operation)),
                _ = tokio::time::sleep(wait) => {}
            }
            attempt += 1;
        }
    }
}

fn cancelled(operation: &str) -> DecisionError {
    DecisionError::Cancelled {
        operation: operation.to_string(),
    }
}
