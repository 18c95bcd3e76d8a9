// SPDX-License-Identifier: Apache-2.0

//! Primary rate limit accounting.
//!
//! A [`RateLimiter`] is owned explicitly and shared through `Arc` by every
//! client that draws from the same quota. It gates each outbound call with a
//! minimum spacing and, once the quota is exhausted, blocks callers until the
//! reset time. The internal lock is never held across a sleep.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Cancelled;
use crate::retry::{millis, sleep_cancellable, sleep_until_cancellable};

/// Quota assumed before the first response reports one.
pub const DEFAULT_RATE_LIMIT: u32 = 5000;

/// Minimum spacing between two outbound calls.
pub const DEFAULT_MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(100);

/// First delay of the reset-unknown backoff.
pub const DEFAULT_BACKOFF_FLOOR: Duration = Duration::from_secs(1);

/// Cap of the reset-unknown backoff.
pub const DEFAULT_BACKOFF_CEILING: Duration = Duration::from_secs(300);

const HEADER_REMAINING: &str = "x-ratelimit-remaining";
const HEADER_LIMIT: &str = "x-ratelimit-limit";
const HEADER_RESET: &str = "x-ratelimit-reset";

/// Primary rate limit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitSnapshot {
    /// Number of calls remaining in the current window.
    pub remaining: u32,
    /// Total number of calls allowed in the window.
    pub limit: u32,
    /// When `remaining` is restored to `limit`.
    pub reset_at: Option<DateTime<Utc>>,
}

impl Default for RateLimitSnapshot {
    fn default() -> Self {
        Self {
            remaining: DEFAULT_RATE_LIMIT,
            limit: DEFAULT_RATE_LIMIT,
            reset_at: None,
        }
    }
}

impl RateLimitSnapshot {
    /// Returns true if the quota is low (remaining < 100).
    #[must_use]
    pub fn is_low(&self) -> bool {
        self.remaining < 100
    }

    /// Returns a human-readable status message.
    #[must_use]
    pub fn message(&self) -> String {
        format!("{}/{} calls remaining", self.remaining, self.limit)
    }

    /// Time left until the reset, if the reset lies after `now`.
    #[must_use]
    pub fn reset_in(&self, now: DateTime<Utc>) -> Option<Duration> {
        let reset_at = self.reset_at?;
        (reset_at - now).to_std().ok().filter(|d| !d.is_zero())
    }

    /// Reads quota metadata from response headers.
    ///
    /// Returns `None` unless both the remaining and limit headers are present.
    /// Negative or oversized values are clamped into `u32`.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let remaining = header_i64(headers, HEADER_REMAINING)?;
        let limit = header_i64(headers, HEADER_LIMIT)?;
        let reset_at =
            header_i64(headers, HEADER_RESET).and_then(|secs| DateTime::from_timestamp(secs, 0));

        Some(Self {
            remaining: clamp_u32(remaining),
            limit: clamp_u32(limit),
            reset_at,
        })
    }
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

fn clamp_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

/// Tunables for a [`RateLimiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterOptions {
    /// Minimum spacing between two calls.
    pub min_interval: Duration,
    /// First reset-unknown backoff delay.
    pub backoff_floor: Duration,
    /// Reset-unknown backoff cap.
    pub backoff_ceiling: Duration,
}

impl Default for RateLimiterOptions {
    fn default() -> Self {
        Self {
            min_interval: DEFAULT_MIN_REQUEST_INTERVAL,
            backoff_floor: DEFAULT_BACKOFF_FLOOR,
            backoff_ceiling: DEFAULT_BACKOFF_CEILING,
        }
    }
}

#[derive(Debug)]
struct LimiterState {
    snapshot: RateLimitSnapshot,
    last_slot: Option<Instant>,
    backoff: Duration,
}

enum Gate {
    AwaitReset {
        reset_at: DateTime<Utc>,
        delay: Duration,
    },
    Proceed {
        slot: Instant,
        previous: Option<Instant>,
    },
}

/// Shared gate in front of every outbound call.
#[derive(Debug)]
pub struct RateLimiter {
    options: RateLimiterOptions,
    state: Mutex<LimiterState>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterOptions::default())
    }
}

impl RateLimiter {
    /// Creates a limiter with the default quota assumption.
    #[must_use]
    pub fn new(options: RateLimiterOptions) -> Self {
        Self {
            options,
            state: Mutex::new(LimiterState {
                snapshot: RateLimitSnapshot::default(),
                last_slot: None,
                backoff: options.backoff_floor,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until the next call is allowed.
    ///
    /// Enforces the minimum spacing since the previous call and, when the
    /// quota is exhausted with a future reset time, waits for that reset and
    /// then optimistically restores `remaining` to `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if `cancel` fires while waiting. A cancelled wait
    /// leaves the quota accounting as it found it.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }

            let gate = self.reserve();

            match gate {
                Gate::AwaitReset { reset_at, delay } => {
                    warn!(
                        reset_at = %reset_at,
                        wait_ms = millis(delay),
                        "Rate limit exhausted, waiting for reset"
                    );
                    sleep_cancellable(delay, cancel).await?;
                    self.restore_after_reset(reset_at);
                }
                Gate::Proceed { slot, previous } => {
                    if slot > Instant::now()
                        && sleep_until_cancellable(slot, cancel).await.is_err()
                    {
                        self.release(slot, previous);
                        return Err(Cancelled);
                    }
                    return Ok(());
                }
            }
        }
    }

    fn reserve(&self) -> Gate {
        let mut state = self.lock();
        let snapshot = state.snapshot;

        if snapshot.remaining == 0
            && let Some(reset_at) = snapshot.reset_at
            && let Some(delay) = snapshot.reset_in(Utc::now())
        {
            return Gate::AwaitReset { reset_at, delay };
        }

        let now = Instant::now();
        let slot = match state.last_slot {
            Some(last) => (last + self.options.min_interval).max(now),
            None => now,
        };
        let previous = state.last_slot.replace(slot);
        state.snapshot.remaining = state.snapshot.remaining.saturating_sub(1);
        Gate::Proceed { slot, previous }
    }

    fn release(&self, slot: Instant, previous: Option<Instant>) {
        let mut state = self.lock();
        if state.last_slot == Some(slot) {
            state.last_slot = previous;
            state.snapshot.remaining = state
                .snapshot
                .remaining
                .saturating_add(1)
                .min(state.snapshot.limit);
        }
    }

    fn restore_after_reset(&self, reset_at: DateTime<Utc>) {
        let mut state = self.lock();
        if state.snapshot.reset_at == Some(reset_at) && state.snapshot.remaining == 0 {
            state.snapshot.remaining = state.snapshot.limit;
            debug!(limit = state.snapshot.limit, "Rate limit window reset");
        }
    }

    /// Overwrites the quota snapshot with values from the latest response.
    pub fn update_limits(&self, remaining: u32, limit: u32, reset_at: Option<DateTime<Utc>>) {
        let mut state = self.lock();
        state.snapshot = RateLimitSnapshot {
            remaining,
            limit,
            reset_at,
        };
    }

    /// Returns the current quota snapshot.
    #[must_use]
    pub fn get_status(&self) -> RateLimitSnapshot {
        self.lock().snapshot
    }

    /// Sleeps for the current reset-unknown backoff, then doubles it.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if `cancel` fires while sleeping.
    pub async fn start_backoff(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        let delay = {
            let mut state = self.lock();
            let delay = state.backoff;
            state.backoff = delay.saturating_mul(2).min(self.options.backoff_ceiling);
            delay
        };
        warn!(
            wait_ms = millis(delay),
            "Rate limited without reset time, backing off"
        );
        sleep_cancellable(delay, cancel).await
    }

    /// Returns the reset-unknown backoff to its floor.
    pub fn reset_backoff(&self) {
        self.lock().backoff = self.options.backoff_floor;
    }

    /// Delay the next [`start_backoff`](Self::start_backoff) would sleep.
    #[must_use]
    pub fn current_backoff(&self) -> Duration {
        self.lock().backoff
    }

    /// Waits for the authoritative reset time, or backs off when none is known.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if `cancel` fires while sleeping.
    pub async fn wait_for_reset(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        let snapshot = self.get_status();
        match (snapshot.reset_at, snapshot.reset_in(Utc::now())) {
            (Some(reset_at), Some(delay)) => {
                warn!(
                    reset_at = %reset_at,
                    wait_ms = millis(delay),
                    "Rate limit exceeded, waiting for reset"
                );
                sleep_cancellable(delay, cancel).await?;
                self.restore_after_reset(reset_at);
                Ok(())
            }
            _ => self.start_backoff(cancel).await,
        }
    }
}
