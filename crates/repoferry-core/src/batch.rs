// SPDX-License-Identifier: Apache-2.0

//! Batch status aggregation.
//!
//! A batch's status is never authored by hand while work is running; it is
//! recomputed from the phases of its member repositories, on a fixed tick
//! or on demand. Persistence belongs to a [`BatchStore`] implementation;
//! storage calls are retried with `backon`, independently of the platform
//! retry loop and rate limiter.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::migration::{PhaseBucket, RepositoryMigrationPhase};
use crate::retry::storage_backoff;

/// Batch identifier.
pub type BatchId = Uuid;

/// Error type of [`BatchStore`] implementations.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Batches recomputed concurrently by [`BatchAggregator::recompute_all`].
const RECOMPUTE_CONCURRENCY: usize = 4;

/// Rolled-up status of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Created, not yet scheduled. Stored only, never computed.
    Pending,
    /// Ready to run, or nothing has started.
    Ready,
    /// At least one member is being worked on.
    InProgress,
    /// Every member is complete.
    Completed,
    /// Every member failed.
    Failed,
    /// Members finished with a mix of successes and failures.
    CompletedWithErrors,
    /// Cancelled by an operator. Stored only, never computed.
    Cancelled,
}

impl BatchStatus {
    /// Returns the snake_case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::Cancelled => "cancelled",
        }
    }

    /// Statuses that earn a completion timestamp.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::CompletedWithErrors | Self::Cancelled
        )
    }

    /// Statuses recomputation leaves alone.
    #[must_use]
    pub fn is_stable(self) -> bool {
        matches!(self, Self::Pending | Self::Ready | Self::Cancelled)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Batch identifier.
    pub id: BatchId,
    /// Display name.
    pub name: String,
    /// Stored status.
    pub status: BatchStatus,
    /// When the batch was started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the batch first reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

/// A member repository of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRepository {
    /// `owner/repo` on the source instance.
    pub full_name: String,
    /// Current migration phase.
    pub phase: RepositoryMigrationPhase,
}

/// Persistence of batches and their members.
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Every batch.
    async fn list_batches(&self) -> Result<Vec<Batch>, StoreError>;

    /// One batch, or `None` if it does not exist.
    async fn get_batch(&self, id: BatchId) -> Result<Option<Batch>, StoreError>;

    /// Member repositories of a batch.
    async fn list_batch_repositories(&self, id: BatchId)
    -> Result<Vec<BatchRepository>, StoreError>;

    /// Persists a new status.
    ///
    /// `completed_at` is `Some` only when a completion timestamp should be
    /// stamped; `None` leaves the stored timestamp as it is.
    async fn update_batch_status(
        &self,
        id: BatchId,
        status: BatchStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;
}

/// Errors raised by [`BatchAggregator`].
#[derive(Error, Debug)]
pub enum BatchError {
    /// The batch does not exist.
    #[error("Batch {0} not found")]
    NotFound(BatchId),

    /// A storage call failed after retries.
    #[error("Batch storage {operation} failed: {source}")]
    Storage {
        /// Store method that failed.
        operation: &'static str,
        /// Last storage error.
        #[source]
        source: StoreError,
    },
}

/// Result of recomputing one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecomputeOutcome {
    /// The stored status is stable; nothing was computed.
    Skipped {
        /// Stored status.
        status: BatchStatus,
    },
    /// The computed status matches the stored one; nothing was written.
    Unchanged {
        /// Stored and computed status.
        status: BatchStatus,
    },
    /// The status changed and was persisted.
    Updated {
        /// Previous status.
        from: BatchStatus,
        /// New status.
        to: BatchStatus,
    },
}

/// Totals of one [`BatchAggregator::recompute_all`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecomputeReport {
    /// Batches whose status changed.
    pub updated: usize,
    /// Batches recomputed without a change.
    pub unchanged: usize,
    /// Batches in a stable status.
    pub skipped: usize,
    /// Batches that could not be recomputed.
    pub failed: usize,
}

/// Derives a batch status from its members' phases.
///
/// Evaluated in order: any in-progress member wins, then all completed, all
/// failed, a completed and failed mix, all dry runs complete. Anything else,
/// including an empty batch, is `ready`.
#[must_use]
pub fn compute_batch_status<I>(phases: I) -> BatchStatus
where
    I: IntoIterator<Item = RepositoryMigrationPhase>,
{
    let mut counts: HashMap<PhaseBucket, usize> = HashMap::new();
    let mut total = 0_usize;
    for phase in phases {
        *counts.entry(phase.bucket()).or_default() += 1;
        total += 1;
    }
    let count = |bucket: PhaseBucket| counts.get(&bucket).copied().unwrap_or(0);

    let completed = count(PhaseBucket::Completed);
    let failed = count(PhaseBucket::Failed);

    if count(PhaseBucket::InProgress) > 0 {
        BatchStatus::InProgress
    } else if total > 0 && completed == total {
        BatchStatus::Completed
    } else if total > 0 && failed == total {
        BatchStatus::Failed
    } else if completed > 0 && failed > 0 {
        BatchStatus::CompletedWithErrors
    } else {
        // All dry runs complete is `ready` too; so is everything left.
        BatchStatus::Ready
    }
}

/// Periodically rolls member phases up into batch statuses.
pub struct BatchAggregator {
    store: Arc<dyn BatchStore>,
    tick_interval: Duration,
    storage_retry_attempts: usize,
}

impl fmt::Debug for BatchAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchAggregator")
            .field("tick_interval", &self.tick_interval)
            .field("storage_retry_attempts", &self.storage_retry_attempts)
            .finish_non_exhaustive()
    }
}

impl BatchAggregator {
    /// Creates an aggregator over `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn BatchStore>,
        tick_interval: Duration,
        storage_retry_attempts: usize,
    ) -> Self {
        Self {
            store,
            tick_interval,
            storage_retry_attempts,
        }
    }

    /// Recomputes one batch and persists the result if it changed.
    ///
    /// Running it twice without member changes writes nothing the second time.
    ///
    /// # Errors
    ///
    /// - [`BatchError::NotFound`] if the batch does not exist
    /// - [`BatchError::Storage`] if a storage call keeps failing
    #[instrument(skip(self))]
    pub async fn recompute_batch_status(&self, id: BatchId) -> Result<RecomputeOutcome, BatchError> {
        let batch = self
            .with_retry("get_batch", || self.store.get_batch(id))
            .await?
            .ok_or(BatchError::NotFound(id))?;
        self.recompute(&batch).await
    }

    /// Recomputes every batch that is not in a stable status.
    ///
    /// A failing batch is logged and counted; it does not stop the pass.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Storage`] if the batch list cannot be loaded.
    #[instrument(skip(self))]
    pub async fn recompute_all(&self) -> Result<RecomputeReport, BatchError> {
        let batches = self
            .with_retry("list_batches", || self.store.list_batches())
            .await?;

        let (stable, active): (Vec<Batch>, Vec<Batch>) = batches
            .into_iter()
            .partition(|batch| batch.status.is_stable());
        let mut report = RecomputeReport {
            skipped: stable.len(),
            ..RecomputeReport::default()
        };

        let outcomes: Vec<(BatchId, Result<RecomputeOutcome, BatchError>)> =
            stream::iter(active)
                .map(|batch| async move {
                    let outcome = self.recompute(&batch).await;
                    (batch.id, outcome)
                })
                .buffer_unordered(RECOMPUTE_CONCURRENCY)
                .collect()
                .await;

        for (id, outcome) in outcomes {
            match outcome {
                Ok(RecomputeOutcome::Updated { .. }) => report.updated += 1,
                Ok(RecomputeOutcome::Unchanged { .. }) => report.unchanged += 1,
                Ok(RecomputeOutcome::Skipped { .. }) => report.skipped += 1,
                Err(err) => {
                    warn!(batch_id = %id, error = %err, "Batch recomputation failed");
                    report.failed += 1;
                }
            }
        }

        debug!(?report, "Batch recomputation pass finished");
        Ok(report)
    }

    /// Runs [`Self::recompute_all`] every tick until `cancel` fires.
    ///
    /// The first pass runs immediately.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = self.tick_interval.as_secs(), "Batch aggregator started");

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.recompute_all().await {
                            warn!(error = %err, "Batch recomputation pass failed");
                        }
                    }
                }
            }

            info!("Batch aggregator stopped");
        })
    }

    async fn recompute(&self, batch: &Batch) -> Result<RecomputeOutcome, BatchError> {
        if batch.status.is_stable() {
            return Ok(RecomputeOutcome::Skipped {
                status: batch.status,
            });
        }

        let id = batch.id;
        let members = self
            .with_retry("list_batch_repositories", || {
                self.store.list_batch_repositories(id)
            })
            .await?;
        let computed = compute_batch_status(members.iter().map(|member| member.phase));

        if computed == batch.status {
            return Ok(RecomputeOutcome::Unchanged { status: computed });
        }

        let completed_at = (computed.is_terminal() && batch.completed_at.is_none())
            .then(Utc::now);
        self.with_retry("update_batch_status", || {
            self.store.update_batch_status(id, computed, completed_at)
        })
        .await?;

        info!(
            batch_id = %id,
            from = %batch.status,
            to = %computed,
            members = members.len(),
            "Batch status updated"
        );
        Ok(RecomputeOutcome::Updated {
            from: batch.status,
            to: computed,
        })
    }

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T, BatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        call.retry(storage_backoff(self.storage_retry_attempts))
            .notify(|err, delay| {
                warn!(
                    operation,
                    error = %err,
                    retry_after = ?delay,
                    "Retrying batch storage call"
                );
            })
            .await
            .map_err(|source| BatchError::Storage { operation, source })
    }
}
