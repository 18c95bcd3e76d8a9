// SPDX-License-Identifier: Apache-2.0

//! Retry logic for platform calls.
//!
//! [`Retryer`] drives a bounded retry loop per logical operation. Every
//! attempt passes the shared [`RateLimiter`] first; failures are classified
//! and the wait before the next attempt depends on the classification:
//!
//! - `RateLimitBlocked`: the parsed countdown plus padding, clamped
//! - `SecondaryRateLimitExceeded`: a fixed wait
//! - `RateLimitExceeded`: the limiter's authoritative reset wait
//! - anything else retryable: exponential backoff
//!
//! All sleeps are cancellable.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::classify::{ClassifiedError, ErrorKind, classify};
use crate::error::Cancelled;
use crate::github::ratelimit::RateLimiter;

/// Default number of attempts per logical operation.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Error returned by [`Retryer::run`] and [`Retryer::run_with`].
#[derive(Error, Debug)]
pub enum RetryError {
    /// The cancellation token fired before the operation finished.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    /// Every attempt failed with a retryable error.
    #[error("{operation} failed after {attempts} attempts: {last}")]
    Exhausted {
        /// Logical operation name.
        operation: String,
        /// Number of attempts made.
        attempts: usize,
        /// Classification of the final failure.
        #[source]
        last: ClassifiedError,
    },

    /// An attempt failed with a non-retryable error.
    #[error("{operation} failed: {error}")]
    Terminal {
        /// Logical operation name.
        operation: String,
        /// Classification of the failure.
        #[source]
        error: ClassifiedError,
    },
}

impl RetryError {
    /// The classified failure behind this error, if it is not a cancellation.
    #[must_use]
    pub fn classified(&self) -> Option<&ClassifiedError> {
        match self {
            Self::Cancelled(_) => None,
            Self::Exhausted { last, .. } => Some(last),
            Self::Terminal { error, .. } => Some(error),
        }
    }

    /// Classification kind of the underlying failure.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        self.classified().map(ClassifiedError::kind)
    }

    /// Returns true for [`RetryError::Cancelled`].
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Retry tunables, one instance per client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per logical operation, including the first.
    pub max_attempts: usize,
    /// First exponential backoff delay.
    pub initial_backoff: Duration,
    /// Exponential backoff cap.
    pub max_backoff: Duration,
    /// Growth factor between consecutive backoff delays.
    pub backoff_multiplier: f32,
    /// Fixed wait after a secondary rate limit.
    pub secondary_rate_limit_wait: Duration,
    /// Lower bound of the wait after a pre-emptive block.
    pub blocked_wait_floor: Duration,
    /// Upper bound of the wait after a pre-emptive block.
    pub blocked_wait_ceiling: Duration,
    /// Added to a pre-emptive block countdown before clamping.
    pub blocked_wait_padding: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            secondary_rate_limit_wait: Duration::from_secs(60),
            blocked_wait_floor: Duration::from_secs(10),
            blocked_wait_ceiling: Duration::from_secs(15 * 60),
            blocked_wait_padding: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_backoff)
            .with_max_delay(self.max_backoff)
            .with_factor(self.backoff_multiplier)
            .with_max_times(self.max_attempts)
            .build()
    }

    /// Wait before retrying a pre-emptively blocked call.
    #[must_use]
    pub fn blocked_wait(&self, countdown: Duration) -> Duration {
        countdown
            .saturating_add(self.blocked_wait_padding)
            .min(self.blocked_wait_ceiling)
            .max(self.blocked_wait_floor)
    }
}

/// Bounded retry loop sharing one rate limiter.
#[derive(Debug, Clone)]
pub struct Retryer {
    policy: RetryPolicy,
    limiter: Arc<RateLimiter>,
}

impl Retryer {
    /// Creates a retryer gated by `limiter`.
    #[must_use]
    pub fn new(policy: RetryPolicy, limiter: Arc<RateLimiter>) -> Self {
        Self { policy, limiter }
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Returns the shared rate limiter.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Runs `attempt` until it succeeds, fails terminally, or runs out of attempts.
    ///
    /// # Errors
    ///
    /// See [`Retryer::run_with`].
    pub async fn run<F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        attempt: F,
    ) -> Result<(), RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        self.run_with(operation, cancel, attempt).await
    }

    /// Runs `attempt` and threads its typed result through on success.
    ///
    /// # Arguments
    ///
    /// * `operation` - Name used in logs and in the exhaustion error
    /// * `cancel` - Token interrupting every wait and the in-flight attempt
    /// * `attempt` - Performs one attempt
    ///
    /// # Errors
    ///
    /// - [`RetryError::Cancelled`] when `cancel` fires
    /// - [`RetryError::Terminal`] on the first non-retryable failure
    /// - [`RetryError::Exhausted`] when the last attempt fails
    #[instrument(skip_all, fields(operation = %operation))]
    pub async fn run_with<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut backoff = self.policy.backoff();
        let mut attempts = 0;

        loop {
            attempts += 1;
            self.limiter.wait(cancel).await?;

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(RetryError::Cancelled(Cancelled)),
                result = attempt() => result,
            };

            let error = match outcome {
                Ok(value) => {
                    self.limiter.reset_backoff();
                    if attempts > 1 {
                        debug!(attempts, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(raw) => classify(raw),
            };

            if !error.is_retryable() {
                debug!(kind = %error.kind(), "Non-retryable failure");
                return Err(RetryError::Terminal {
                    operation: operation.to_string(),
                    error,
                });
            }

            if attempts >= max_attempts {
                warn!(attempts, kind = %error.kind(), "Retry budget exhausted");
                return Err(RetryError::Exhausted {
                    operation: operation.to_string(),
                    attempts,
                    last: error,
                });
            }

            self.pause(&error, &mut backoff, attempts, cancel).await?;
        }
    }

    async fn pause(
        &self,
        error: &ClassifiedError,
        backoff: &mut ExponentialBackoff,
        attempt: usize,
        cancel: &CancellationToken,
    ) -> Result<(), Cancelled> {
        match error {
            ClassifiedError::RateLimitBlocked { reset_in, .. } => {
                let delay = self.policy.blocked_wait(*reset_in);
                warn!(attempt, wait_ms = millis(delay), "Rate limit block, waiting for countdown");
                sleep_cancellable(delay, cancel).await
            }
            ClassifiedError::SecondaryRateLimitExceeded(_) => {
                let delay = self.policy.secondary_rate_limit_wait;
                warn!(attempt, wait_ms = millis(delay), "Secondary rate limit hit, pausing");
                sleep_cancellable(delay, cancel).await
            }
            ClassifiedError::RateLimitExceeded(_) => self.limiter.wait_for_reset(cancel).await,
            _ => {
                let delay = backoff.next().unwrap_or(self.policy.max_backoff);
                warn!(
                    attempt,
                    kind = %error.kind(),
                    error = %error.message(),
                    wait_ms = millis(delay),
                    "Retrying after transient error"
                );
                sleep_cancellable(delay, cancel).await
            }
        }
    }
}

/// Sleeps for `duration` unless `cancel` fires first.
///
/// # Errors
///
/// Returns [`Cancelled`] if the token fires before the sleep completes.
pub async fn sleep_cancellable(
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<(), Cancelled> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Cancelled),
        () = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Sleeps until `deadline` unless `cancel` fires first.
///
/// # Errors
///
/// Returns [`Cancelled`] if the token fires before the deadline.
pub async fn sleep_until_cancellable(
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<(), Cancelled> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Cancelled),
        () = tokio::time::sleep_until(deadline) => Ok(()),
    }
}

/// Backoff for calls that do not go through the platform [`Retryer`],
/// such as batch storage access.
#[must_use]
pub fn storage_backoff(max_times: usize) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_factor(2.0)
        .with_min_delay(Duration::from_secs(1))
        .with_max_times(max_times)
        .with_jitter()
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn retryer() -> Retryer {
        Retryer::new(RetryPolicy::default(), Arc::new(RateLimiter::default()))
    }

    #[test]
    fn test_blocked_wait_clamps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.blocked_wait(Duration::from_secs(1)), Duration::from_secs(10));
        assert_eq!(policy.blocked_wait(Duration::from_secs(45)), Duration::from_secs(50));
        assert_eq!(policy.blocked_wait(Duration::from_secs(3600)), Duration::from_secs(900));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
            ..RetryPolicy::default()
        };
        let delays: Vec<Duration> = policy.backoff().take(4).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(5),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let result = retryer()
            .run("flaky", &cancel, || {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        anyhow::bail!("502 Bad Gateway");
                    }
                    Ok(())
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_exhausts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let result = retryer()
            .run("broken", &cancel, || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow::anyhow!("connection reset by peer"))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(RetryError::Exhausted {
                operation,
                attempts,
                last,
            }) => {
                assert_eq!(operation, "broken");
                assert_eq!(attempts, 3);
                assert_eq!(last.kind(), ErrorKind::StreamError);
                assert!(last.message().contains("connection reset"));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_is_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let result = retryer()
            .run("lookup", &cancel, || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow::anyhow!("404 Not Found"))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NotFound));
        assert!(matches!(err, RetryError::Terminal { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_with_threads_result() {
        let cancel = CancellationToken::new();
        let value = retryer()
            .run_with("answer", &cancel, || async { Ok(42_u32) })
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_secondary_rate_limit_waits_fixed_interval() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let start = Instant::now();

        retryer()
            .run("burst", &cancel, || {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        anyhow::bail!("You have exceeded a secondary rate limit");
                    }
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_waits_for_clamped_countdown() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let start = Instant::now();

        retryer()
            .run("blocked", &cancel, || {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        anyhow::bail!("not making remote request. [rate reset in 2s]");
                    }
                    Ok(())
                }
            })
            .await
            .unwrap();

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let result = retryer()
            .run("cancelled", &cancel, || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow::anyhow!("503 Service Unavailable"))
                }
            })
            .await;

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = Arc::new(AtomicUsize::new(0));

        let result = retryer()
            .run("never", &cancel, || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_exceeded_waits_for_reset() {
        let retryer = retryer();
        let limiter = Arc::clone(retryer.limiter());
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let reset_at = Utc::now() + TimeDelta::seconds(30);
        let start = Instant::now();

        retryer
            .run("quota", &cancel, || {
                let calls = Arc::clone(&calls);
                let limiter = Arc::clone(&limiter);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        // The response that failed reported an empty window
                        limiter.update_limits(0, 5000, Some(reset_at));
                        anyhow::bail!("429 Too Many Requests");
                    }
                    Ok(())
                }
            })
            .await
            .unwrap();

        let elapsed = start.elapsed();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(elapsed >= Duration::from_secs(29), "waited {elapsed:?}");
        assert!(elapsed < Duration::from_secs(31), "waited {elapsed:?}");

        let status = limiter.get_status();
        assert_eq!(status.remaining, 4999);
        assert_eq!(status.limit, 5000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_exceeded_without_reset_backs_off() {
        let retryer = retryer();
        let limiter = Arc::clone(retryer.limiter());
        let calls = Arc::new(AtomicUsize::new(0));
        let backoff_on_retry = Arc::new(std::sync::Mutex::new(None));
        let cancel = CancellationToken::new();
        let start = Instant::now();

        retryer
            .run("quota", &cancel, || {
                let calls = Arc::clone(&calls);
                let limiter = Arc::clone(&limiter);
                let backoff_on_retry = Arc::clone(&backoff_on_retry);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        anyhow::bail!("429 Too Many Requests");
                    }
                    *backoff_on_retry.lock().unwrap() = Some(limiter.current_backoff());
                    Ok(())
                }
            })
            .await
            .unwrap();

        let elapsed = start.elapsed();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(elapsed >= Duration::from_secs(1), "waited {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "waited {elapsed:?}");

        // One backoff was taken, then success returned it to the floor
        assert_eq!(
            *backoff_on_retry.lock().unwrap(),
            Some(Duration::from_secs(2))
        );
        assert_eq!(limiter.current_backoff(), Duration::from_secs(1));
    }
}
