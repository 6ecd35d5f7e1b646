// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retry policy attached to DAG nodes by the Workflow Builder (§4.7):
//! max 2 attempts, 1s initial delay, 5s cap, exponential backoff by
//! default, and a fixed non-retryable error-substring list.

use std::future::Future;
use std::time::Duration;

use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            multiplier,
            max_delay,
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(scaled).min(self.max_delay)
    }
}

pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Runs `f` up to `policy.max_attempts` times, backing off between
    /// attempts. Stops early if the error is non-retryable (§4.7/§7).
    pub async fn execute<F, Fut, T>(&self, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 >= self.policy.max_attempts || !err.is_retryable() => {
                    return Err(err);
                }
                Err(err) => {
                    tracing::debug!(attempt, error = %err, "step attempt failed, retrying");
                    tokio::time::sleep(self.policy.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), 1.0, Duration::from_millis(5));
        let executor = RetryExecutor::new(policy);
        let calls = AtomicU32::new(0);

        let result: Result<u32> = executor
            .execute(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(OrchestratorError::other("transient"))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_after_max_attempts() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1), 1.0, Duration::from_millis(5));
        let executor = RetryExecutor::new(policy);
        let calls = AtomicU32::new(0);

        let result: Result<u32> = executor
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(OrchestratorError::other("always fails"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1), 1.0, Duration::from_millis(5));
        let executor = RetryExecutor::new(policy);
        let calls = AtomicU32::new(0);

        let result: Result<u32> = executor
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(OrchestratorError::other("validation failed: bad input"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
