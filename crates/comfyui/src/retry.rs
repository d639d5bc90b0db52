//! Bounded retry for backend reachability and stream connection.
//!
//! A cold ComfyUI instance may take minutes to load its models, so the
//! driver polls with a bounded number of attempts before giving up.
//! [`retry_bounded`] runs an async operation until it succeeds or the
//! policy's attempt budget is spent.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Attempt budget and pacing for one retry loop.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Pause between a failed attempt and the next one.
    pub delay: Duration,
    /// Time limit for a single attempt.
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration, attempt_timeout: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            attempt_timeout,
        }
    }

    /// Plain HTTP probe of the backend: 180 attempts, 1 s apart, 5 s each.
    pub fn http_probe() -> Self {
        Self::fixed(180, Duration::from_secs(1), Duration::from_secs(5))
    }

    /// WebSocket establishment: 36 attempts, 5 s apart, 10 s each.
    pub fn stream_connect() -> Self {
        Self::fixed(36, Duration::from_secs(5), Duration::from_secs(10))
    }
}

/// Every attempt failed.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Run `attempt` until it succeeds or `policy.max_attempts` is reached.
///
/// The closure receives the 1-based attempt number. `operation` labels the
/// log lines.
pub async fn retry_bounded<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut attempt: F,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut number = 0u32;

    loop {
        number += 1;

        match attempt(number).await {
            Ok(value) => {
                if number > 1 {
                    tracing::info!(operation, attempt = number, "Succeeded after retrying");
                }
                return Ok(value);
            }
            Err(e) if number >= max_attempts => {
                tracing::error!(
                    operation,
                    attempts = number,
                    error = %e,
                    "Giving up after exhausting attempts",
                );
                return Err(RetryExhausted {
                    attempts: number,
                    last_error: e,
                });
            }
            Err(e) => {
                tracing::debug!(
                    operation,
                    attempt = number,
                    max_attempts,
                    delay_ms = policy.delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying",
                );
            }
        }

        tokio::time::sleep(policy.delay).await;
    }
}
