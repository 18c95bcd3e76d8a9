// SPDX-License-Identifier: Apache-2.0

//! Repository migration lifecycle.
//!
//! Phases are owned by the migration executor; this module enforces the
//! ordered lifecycle for the transitions the core drives itself and sorts
//! phases into the buckets batch aggregation works with.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One state in a repository's migration lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryMigrationPhase {
    /// Not started.
    Pending,
    /// Dry run waiting for a worker.
    DryRunQueued,
    /// Dry run running.
    DryRunInProgress,
    /// Dry run succeeded.
    DryRunComplete,
    /// Dry run failed.
    DryRunFailed,
    /// Preparing the real migration.
    PreMigration,
    /// Source archives are being exported.
    ArchiveGenerating,
    /// Waiting for the destination to import.
    QueuedForMigration,
    /// Destination import running.
    MigratingContent,
    /// Import finished.
    MigrationComplete,
    /// Import or preparation failed.
    MigrationFailed,
    /// Post-import fixups running.
    PostMigration,
    /// Fully migrated.
    Complete,
}

/// Aggregation bucket of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseBucket {
    /// Fully migrated.
    Completed,
    /// Dry run or migration failed.
    Failed,
    /// Work is queued or running.
    InProgress,
    /// Dry run succeeded; ready for the real migration.
    DryRunComplete,
    /// Nothing has started.
    Pending,
}

/// Rejected phase change.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Invalid migration phase transition from {from} to {to}")]
pub struct PhaseTransitionError {
    /// Current phase.
    pub from: RepositoryMigrationPhase,
    /// Requested phase.
    pub to: RepositoryMigrationPhase,
}

/// Unknown phase name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown migration phase: {0}")]
pub struct UnknownPhase(pub String);

impl RepositoryMigrationPhase {
    /// Every phase, in lifecycle order.
    pub const ALL: [Self; 13] = [
        Self::Pending,
        Self::DryRunQueued,
        Self::DryRunInProgress,
        Self::DryRunComplete,
        Self::DryRunFailed,
        Self::PreMigration,
        Self::ArchiveGenerating,
        Self::QueuedForMigration,
        Self::MigratingContent,
        Self::MigrationComplete,
        Self::MigrationFailed,
        Self::PostMigration,
        Self::Complete,
    ];

    /// Returns the snake_case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::DryRunQueued => "dry_run_queued",
            Self::DryRunInProgress => "dry_run_in_progress",
            Self::DryRunComplete => "dry_run_complete",
            Self::DryRunFailed => "dry_run_failed",
            Self::PreMigration => "pre_migration",
            Self::ArchiveGenerating => "archive_generating",
            Self::QueuedForMigration => "queued_for_migration",
            Self::MigratingContent => "migrating_content",
            Self::MigrationComplete => "migration_complete",
            Self::MigrationFailed => "migration_failed",
            Self::PostMigration => "post_migration",
            Self::Complete => "complete",
        }
    }

    /// Phases with no automatic successor.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Complete | Self::MigrationFailed | Self::DryRunFailed
        )
    }

    /// Whether the phase belongs to the real migration run.
    fn in_migration_run(self) -> bool {
        matches!(
            self,
            Self::PreMigration
                | Self::ArchiveGenerating
                | Self::QueuedForMigration
                | Self::MigratingContent
                | Self::MigrationComplete
                | Self::PostMigration
        )
    }

    /// Aggregation bucket.
    #[must_use]
    pub fn bucket(self) -> PhaseBucket {
        match self {
            Self::Complete => PhaseBucket::Completed,
            Self::MigrationFailed | Self::DryRunFailed => PhaseBucket::Failed,
            Self::DryRunComplete => PhaseBucket::DryRunComplete,
            Self::Pending => PhaseBucket::Pending,
            Self::DryRunQueued
            | Self::DryRunInProgress
            | Self::PreMigration
            | Self::ArchiveGenerating
            | Self::QueuedForMigration
            | Self::MigratingContent
            | Self::MigrationComplete
            | Self::PostMigration => PhaseBucket::InProgress,
        }
    }

    /// Whether `next` directly follows this phase.
    ///
    /// `migration_failed` to `pre_migration` is the only backward edge.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use RepositoryMigrationPhase as P;

        if next == P::MigrationFailed && self.in_migration_run() {
            return true;
        }

        matches!(
            (self, next),
            (P::Pending, P::DryRunQueued | P::PreMigration)
                | (P::DryRunQueued, P::DryRunInProgress)
                | (P::DryRunInProgress, P::DryRunComplete | P::DryRunFailed)
                | (P::DryRunComplete, P::PreMigration)
                | (P::PreMigration, P::ArchiveGenerating)
                | (P::ArchiveGenerating, P::QueuedForMigration)
                | (P::QueuedForMigration, P::MigratingContent)
                | (P::MigratingContent, P::MigrationComplete)
                | (P::MigrationComplete, P::PostMigration)
                | (P::PostMigration, P::Complete)
                | (P::MigrationFailed, P::PreMigration)
        )
    }

    /// Moves to `next` if the lifecycle allows it.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseTransitionError`] for any edge the lifecycle lacks.
    pub fn transition_to(self, next: Self) -> Result<Self, PhaseTransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(PhaseTransitionError {
                from: self,
                to: next,
            })
        }
    }

    /// Returns a repository to `pending`, discarding progress.
    ///
    /// # Errors
    ///
    /// A completed repository cannot be reset.
    pub fn reset(self) -> Result<Self, PhaseTransitionError> {
        if self == Self::Complete {
            Err(PhaseTransitionError {
                from: self,
                to: Self::Pending,
            })
        } else {
            Ok(Self::Pending)
        }
    }
}

impl fmt::Display for RepositoryMigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepositoryMigrationPhase {
    type Err = UnknownPhase;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| UnknownPhase(s.to_string()))
    }
}
