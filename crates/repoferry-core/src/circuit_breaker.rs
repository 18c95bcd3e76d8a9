// SPDX-License-Identifier: Apache-2.0

//! Circuit breaker for platform resilience.
//!
//! Protects a downstream that is already known to be failing by tracking
//! consecutive failures and transitioning between Closed, Open, and Half-Open
//! states. The breaker sits around a [`Retryer`](crate::retry::Retryer) call,
//! never inside its loop: the retryer retries within one logical call, while
//! the breaker short-circuits later unrelated calls.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::retry::RetryError;

/// Default consecutive failures before opening.
pub const DEFAULT_MAX_FAILURES: u32 = 5;

/// Default wait in the open state before a half-open trial request.
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(60);

/// Breaker state.
///
/// - **Closed**: normal operation, requests pass through.
/// - **Open**: threshold reached, requests fail immediately.
/// - **Half-Open**: reset timeout elapsed, a trial request tests the downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow; failures are counted.
    Closed,
    /// Requests are rejected until the reset timeout elapses.
    Open,
    /// A trial request is allowed through.
    HalfOpen,
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Error, Debug)]
pub enum BreakerError {
    /// The breaker short-circuited the call.
    #[error("Circuit breaker is open after {failures} consecutive failures")]
    Open {
        /// Consecutive failures recorded when the call was rejected.
        failures: u32,
    },

    /// The call ran and failed.
    #[error(transparent)]
    Call(#[from] RetryError),
}

impl BreakerError {
    /// Returns true when the call was rejected without running.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
}

/// Three-state circuit breaker shared by concurrent callers.
#[derive(Debug)]
pub struct CircuitBreaker {
    max_failures: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerState>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FAILURES, DEFAULT_RESET_TIMEOUT)
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    ///
    /// # Arguments
    ///
    /// * `max_failures` - Consecutive failures before opening (default: 5).
    /// * `reset_timeout` - Time to wait before probing again (default: 60s).
    #[must_use]
    pub fn new(max_failures: u32, reset_timeout: Duration) -> Self {
        Self {
            max_failures: max_failures.max(1),
            reset_timeout,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a request may go through.
    ///
    /// An open breaker whose reset timeout has elapsed moves to half-open
    /// and lets the request through as a trial.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_at
                    .is_none_or(|at| at.elapsed() > self.reset_timeout);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    info!("Circuit breaker half-open, probing downstream");
                }
                elapsed
            }
        }
    }

    /// Resets the failure count and closes the breaker.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            info!("Circuit breaker closed");
        }
        inner.failure_count = 0;
        inner.state = CircuitState::Closed;
    }

    /// Counts a failure, opening the breaker once the threshold is reached.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_at = Some(Instant::now());
        if inner.failure_count >= self.max_failures {
            if inner.state != CircuitState::Open {
                warn!(failures = inner.failure_count, "Circuit breaker opened");
            }
            inner.state = CircuitState::Open;
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Consecutive failures recorded so far.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Runs a retried call behind the breaker.
    ///
    /// Success closes the breaker and an exhausted retry budget counts as a
    /// failure. Terminal errors say nothing about downstream health and
    /// cancellations never reached it, so neither changes the state.
    ///
    /// # Errors
    ///
    /// - [`BreakerError::Open`] if the breaker rejects the call
    /// - [`BreakerError::Call`] if the call itself fails
    pub async fn call<T, F, Fut>(&self, call: F) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RetryError>>,
    {
        if !self.allow_request() {
            return Err(BreakerError::Open {
                failures: self.failure_count(),
            });
        }

        match call().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                if matches!(err, RetryError::Exhausted { .. }) {
                    self.record_failure();
                }
                Err(BreakerError::Call(err))
            }
        }
    }
}
