// SPDX-License-Identifier: Apache-2.0

//! Migration-control operations.
//!
//! Platform policy only accepts a personal access token for these calls, so
//! they live on [`MigrationClient`], which the router hands out only for a
//! personal-token client.

use std::ops::Deref;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::auth::AuthStrategy;
use super::client::GitHubClient;
use super::encode_segment;
use crate::classify::{ClassifiedError, ErrorDetail, ErrorKind};
use crate::migration::{PhaseTransitionError, RepositoryMigrationPhase};
use crate::retry::RetryError;

const OWNER_ID_QUERY: &str = r"
query($login: String!) {
  organization(login: $login) { id login }
}";

const CREATE_MIGRATION_SOURCE: &str = r"
mutation($name: String!, $url: String!, $ownerId: ID!, $type: MigrationSourceType!) {
  createMigrationSource(input: {name: $name, url: $url, ownerId: $ownerId, type: $type}) {
    migrationSource { id name url type }
  }
}";

const START_REPOSITORY_MIGRATION: &str = r"
mutation(
  $sourceId: ID!,
  $ownerId: ID!,
  $sourceRepositoryUrl: URI!,
  $repositoryName: String!,
  $continueOnError: Boolean!,
  $gitArchiveUrl: String,
  $metadataArchiveUrl: String,
  $accessToken: String!,
  $githubPat: String,
  $targetRepoVisibility: String,
  $lockSource: Boolean
) {
  startRepositoryMigration(input: {
    sourceId: $sourceId,
    ownerId: $ownerId,
    sourceRepositoryUrl: $sourceRepositoryUrl,
    repositoryName: $repositoryName,
    continueOnError: $continueOnError,
    gitArchiveUrl: $gitArchiveUrl,
    metadataArchiveUrl: $metadataArchiveUrl,
    accessToken: $accessToken,
    githubPat: $githubPat,
    targetRepoVisibility: $targetRepoVisibility,
    lockSource: $lockSource
  }) {
    repositoryMigration { id sourceUrl state repositoryName }
  }
}";

const GET_REPOSITORY_MIGRATION: &str = r"
query($id: ID!) {
  node(id: $id) {
    ... on Migration {
      id
      sourceUrl
      state
      repositoryName
      failureReason
      warningsCount
      migrationLogUrl
    }
  }
}";

/// Remote state of a repository migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteMigrationState {
    /// Accepted, not yet queued.
    NotStarted,
    /// Waiting for an importer.
    Queued,
    /// Import running.
    InProgress,
    /// Import failed.
    Failed,
    /// Import finished.
    Succeeded,
    /// Waiting for source validation.
    PendingValidation,
    /// Source validation failed.
    FailedValidation,
    /// Any state this client does not know yet.
    #[serde(other)]
    Unknown,
}

impl RemoteMigrationState {
    /// Lifecycle phase the remote state corresponds to.
    #[must_use]
    pub fn phase(self) -> Option<RepositoryMigrationPhase> {
        match self {
            Self::NotStarted | Self::Queued | Self::PendingValidation => {
                Some(RepositoryMigrationPhase::QueuedForMigration)
            }
            Self::InProgress => Some(RepositoryMigrationPhase::MigratingContent),
            Self::Failed | Self::FailedValidation => Some(RepositoryMigrationPhase::MigrationFailed),
            Self::Succeeded => Some(RepositoryMigrationPhase::MigrationComplete),
            Self::Unknown => None,
        }
    }
}

/// Archive source of a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationSourceType {
    /// Archives generated from a platform instance.
    GithubArchive,
}

/// A registered migration source.
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationSource {
    /// Node id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Instance the archives come from.
    pub url: String,
    /// Archive source kind.
    #[serde(rename = "type")]
    pub source_type: MigrationSourceType,
}

/// A repository migration as reported by the destination.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryMigration {
    /// Node id.
    pub id: String,
    /// Source repository URL.
    pub source_url: Option<String>,
    /// Remote state.
    pub state: RemoteMigrationState,
    /// Target repository name.
    pub repository_name: Option<String>,
    /// Why the migration failed, once it has.
    #[serde(default)]
    pub failure_reason: Option<String>,
    /// Warnings raised during import.
    #[serde(default)]
    pub warnings_count: Option<u32>,
    /// Download URL of the import log.
    #[serde(default)]
    pub migration_log_url: Option<String>,
}

/// Inputs of [`MigrationClient::start_repository_migration`].
#[derive(Clone, bon::Builder)]
pub struct StartMigration {
    /// Migration source node id.
    #[builder(into)]
    pub source_id: String,
    /// Destination organization node id.
    #[builder(into)]
    pub owner_id: String,
    /// Source repository URL.
    #[builder(into)]
    pub source_repository_url: String,
    /// Target repository name.
    #[builder(into)]
    pub repository_name: String,
    /// Keep importing past recoverable errors.
    #[builder(default)]
    pub continue_on_error: bool,
    /// Pre-generated git archive URL.
    #[builder(into)]
    pub git_archive_url: Option<String>,
    /// Pre-generated metadata archive URL.
    #[builder(into)]
    pub metadata_archive_url: Option<String>,
    /// Token the destination uses to read the source.
    #[builder(into)]
    pub access_token: String,
    /// Token the destination uses to write the target.
    #[builder(into)]
    pub github_pat: Option<String>,
    /// `private`, `internal`, or `public`.
    #[builder(into)]
    pub target_repo_visibility: Option<String>,
    /// Lock the source repository while it migrates.
    pub lock_source: Option<bool>,
}

impl std::fmt::Debug for StartMigration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartMigration")
            .field("source_id", &self.source_id)
            .field("owner_id", &self.owner_id)
            .field("source_repository_url", &self.source_repository_url)
            .field("repository_name", &self.repository_name)
            .field("continue_on_error", &self.continue_on_error)
            .field("target_repo_visibility", &self.target_repo_visibility)
            .field("lock_source", &self.lock_source)
            .finish_non_exhaustive()
    }
}

impl StartMigration {
    /// Mutation variables, named as the `startRepositoryMigration` input expects.
    fn variables(&self) -> Value {
        json!({
            "sourceId": self.source_id,
            "ownerId": self.owner_id,
            "sourceRepositoryUrl": self.source_repository_url,
            "repositoryName": self.repository_name,
            "continueOnError": self.continue_on_error,
            "gitArchiveUrl": self.git_archive_url,
            "metadataArchiveUrl": self.metadata_archive_url,
            "accessToken": self.access_token,
            "githubPat": self.github_pat,
            "targetRepoVisibility": self.target_repo_visibility,
            "lockSource": self.lock_source,
        })
    }
}

/// Failure of [`MigrationClient::retry_after_failure`].
#[derive(Error, Debug)]
pub enum RetryAfterFailureError {
    /// The repository is not in `migration_failed`.
    #[error(transparent)]
    Phase(#[from] PhaseTransitionError),

    /// Unlocking the source repository failed.
    #[error("Failed to unlock source repository: {0}")]
    Unlock(#[source] RetryError),
}

/// A client guaranteed to authenticate with a personal access token.
#[derive(Debug, Clone)]
pub struct MigrationClient {
    inner: GitHubClient,
}

impl MigrationClient {
    /// Wraps `client`, or returns it back if it is not personal-token backed.
    ///
    /// # Errors
    ///
    /// Returns the client unchanged if its strategy is not a personal token.
    pub fn new(client: GitHubClient) -> Result<Self, GitHubClient> {
        if client.strategy() == AuthStrategy::PersonalAccessToken {
            Ok(Self { inner: client })
        } else {
            Err(client)
        }
    }

    /// Node id of an organization.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError`] if the lookup fails or the organization is unknown.
    #[instrument(skip(self, cancel))]
    pub async fn get_owner_id(
        &self,
        login: &str,
        cancel: &CancellationToken,
    ) -> Result<String, RetryError> {
        #[derive(Deserialize)]
        struct Data {
            organization: Option<Org>,
        }
        #[derive(Deserialize)]
        struct Org {
            id: String,
        }

        let operation = "get_owner_id";
        let data: Data = self
            .query(operation, OWNER_ID_QUERY, json!({ "login": login }), cancel)
            .await?;

        data.organization
            .map(|org| org.id)
            .ok_or_else(|| not_found(operation, format!("Organization {login} not found")))
    }

    /// Registers an archive source on the destination.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError`] if the mutation fails.
    #[instrument(skip(self, url, cancel))]
    pub async fn create_migration_source(
        &self,
        owner_id: &str,
        name: &str,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<MigrationSource, RetryError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Data {
            create_migration_source: Payload,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Payload {
            migration_source: MigrationSource,
        }

        let variables = json!({
            "name": name,
            "url": url,
            "ownerId": owner_id,
            "type": MigrationSourceType::GithubArchive,
        });
        let data: Data = self
            .mutate("create_migration_source", CREATE_MIGRATION_SOURCE, variables, cancel)
            .await?;

        info!(source_id = %data.create_migration_source.migration_source.id, "Migration source created");
        Ok(data.create_migration_source.migration_source)
    }

    /// Starts migrating one repository.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError`] if the mutation fails.
    #[instrument(skip(self, input, cancel), fields(repository = %input.repository_name))]
    pub async fn start_repository_migration(
        &self,
        input: &StartMigration,
        cancel: &CancellationToken,
    ) -> Result<RepositoryMigration, RetryError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Data {
            start_repository_migration: Payload,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Payload {
            repository_migration: RepositoryMigration,
        }

        let data: Data = self
            .mutate(
                "start_repository_migration",
                START_REPOSITORY_MIGRATION,
                input.variables(),
                cancel,
            )
            .await?;

        let migration = data.start_repository_migration.repository_migration;
        info!(migration_id = %migration.id, state = ?migration.state, "Repository migration started");
        Ok(migration)
    }

    /// Current state of a repository migration.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError`] if the query fails or the migration is unknown.
    #[instrument(skip(self, cancel))]
    pub async fn get_repository_migration(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<RepositoryMigration, RetryError> {
        #[derive(Deserialize)]
        struct Data {
            node: Option<RepositoryMigration>,
        }

        let operation = "get_repository_migration";
        let data: Data = self
            .query(operation, GET_REPOSITORY_MIGRATION, json!({ "id": id }), cancel)
            .await?;

        data.node
            .ok_or_else(|| not_found(operation, format!("Migration {id} not found")))
    }

    /// Removes the lock a migration export left on a source repository.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError`] if the call fails.
    #[instrument(skip(self, cancel))]
    pub async fn unlock_source_repository(
        &self,
        org: &str,
        migration_id: u64,
        repo: &str,
        cancel: &CancellationToken,
    ) -> Result<(), RetryError> {
        let path = format!(
            "orgs/{}/migrations/{migration_id}/repos/{}/lock",
            encode_segment(org),
            encode_segment(repo)
        );
        self.delete("unlock_source_repository", &path, cancel).await?;
        info!("Source repository unlocked");
        Ok(())
    }

    /// Unlocks a failed repository and moves it back to `pre_migration`.
    ///
    /// A missing lock counts as already unlocked.
    ///
    /// # Errors
    ///
    /// - [`RetryAfterFailureError::Phase`] if `phase` is not `migration_failed`
    /// - [`RetryAfterFailureError::Unlock`] if the unlock call fails
    #[instrument(skip(self, cancel))]
    pub async fn retry_after_failure(
        &self,
        org: &str,
        migration_id: u64,
        repo: &str,
        phase: RepositoryMigrationPhase,
        cancel: &CancellationToken,
    ) -> Result<RepositoryMigrationPhase, RetryAfterFailureError> {
        // Pending and dry_run_complete may also enter pre_migration; retry may not.
        if phase != RepositoryMigrationPhase::MigrationFailed {
            return Err(PhaseTransitionError {
                from: phase,
                to: RepositoryMigrationPhase::PreMigration,
            }
            .into());
        }
        let next = phase.transition_to(RepositoryMigrationPhase::PreMigration)?;

        match self
            .unlock_source_repository(org, migration_id, repo, cancel)
            .await
        {
            Ok(()) => {}
            Err(err) if err.kind() == Some(ErrorKind::NotFound) => {
                warn!("No lock found on source repository, continuing");
            }
            Err(err) => return Err(RetryAfterFailureError::Unlock(err)),
        }

        Ok(next)
    }
}

fn not_found(operation: &str, message: String) -> RetryError {
    RetryError::Terminal {
        operation: operation.to_string(),
        error: ClassifiedError::NotFound(ErrorDetail::new(None, message)),
    }
}

impl Deref for MigrationClient {
    type Target = GitHubClient;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
