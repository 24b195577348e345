// SPDX-License-Identifier: GPL-3.0-only

//! Bounded retry with a fixed delay
//!
//! One primitive for every wait in the crate: result-file polling,
//! reachability probes and user-context task polling.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of probe calls, at least one
    pub attempts: u32,
    /// Pause between two probe calls
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    /// Policy that keeps probing every `interval` until `timeout` has elapsed
    pub fn from_timeout(timeout: Duration, interval: Duration) -> Self {
        if interval.is_zero() {
            return Self::new(1, interval);
        }
        let steps = timeout.as_millis() / interval.as_millis().max(1);
        let attempts = u32::try_from(steps).unwrap_or(u32::MAX).saturating_add(1);
        Self::new(attempts, interval)
    }

    /// Time spent sleeping when every attempt fails
    pub fn budget(&self) -> Duration {
        self.delay.saturating_mul(self.attempts.saturating_sub(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PollError {
    #[error("gave up after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("cancelled")]
    Cancelled,
}

/// Call `probe` until it yields a value, the policy runs out, or `cancel` fires
///
/// `probe` receives the 1-based attempt number. Cancellation drops the
/// in-flight probe future immediately.
pub async fn poll_until<T, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<T, PollError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for attempt in 1..=policy.attempts {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }

        let found = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            found = probe(attempt) => found,
        };

        if let Some(value) = found {
            return Ok(value);
        }

        if attempt < policy.attempts {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PollError::Cancelled),
                _ = tokio::time::sleep(policy.delay) => {}
            }
        }
    }

    Err(PollError::Exhausted {
        attempts: policy.attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn timeout_policy_covers_the_whole_window() {
        let policy = RetryPolicy::from_timeout(Duration::from_secs(10), Duration::from_millis(500));
        assert_eq!(policy.attempts, 21);
        assert_eq!(policy.budget(), Duration::from_secs(10));
        assert_eq!(RetryPolicy::from_timeout(Duration::ZERO, Duration::ZERO).attempts, 1);
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts, 1);
    }

    #[tokio::test]
    async fn returns_first_successful_probe() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = poll_until(
            RetryPolicy::new(5, Duration::from_millis(1)),
            &CancellationToken::new(),
            move |attempt| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { (attempt == 3).then_some(attempt) }
            },
        )
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_after_configured_attempts() {
        let result: Result<(), _> = poll_until(
            RetryPolicy::new(3, Duration::from_millis(1)),
            &CancellationToken::new(),
            |_| async { None },
        )
        .await;
        assert_eq!(result, Err(PollError::Exhausted { attempts: 3 }));
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_delay() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result: Result<(), _> = poll_until(
            RetryPolicy::new(100, Duration::from_secs(60)),
            &cancel,
            |_| async { None },
        )
        .await;

        assert_eq!(result, Err(PollError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(30));
    }
}
