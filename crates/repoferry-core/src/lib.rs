// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! # Repoferry Core
//!
//! Resilient platform client and migration state engine behind the
//! Repoferry CLI.
//!
//! This crate provides reusable components for:
//! - Quota-aware request pacing shared across concurrent workers
//! - Error classification and a bounded, cancellable retry loop
//! - A circuit breaker for downstreams that are known to be failing
//! - Instance topology detection and credential resolution
//! - Batch status aggregation from repository migration phases
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use repoferry_core::{ClientRouter, OperationClass, Side, load_config};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = load_config()?;
//! let router = ClientRouter::new(
//!     config.platform(Side::Source),
//!     config.retry.policy(),
//!     config.rate_limit.options(),
//! )?;
//!
//! let cancel = CancellationToken::new();
//! let client = router.for_operation(OperationClass::Discovery)?;
//! let repos = client.list_org_repositories("octo-org", &cancel).await?;
//! println!("{} repositories, {}", repos.len(), client.rate_limit_status().message());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`batch`] - Batch status aggregation
//! - [`circuit_breaker`] - Circuit breaker
//! - [`classify`] - Error classification
//! - [`config`] - Configuration loading and paths
//! - [`error`] - Shared error types
//! - [`github`] - Platform client, credentials, topology, and operations
//! - [`migration`] - Repository migration lifecycle
//! - [`retry`] - Retry loop and cancellable sleeps

// ============================================================================
// Error Handling
// ============================================================================

pub use error::{Cancelled, ConfigError};

// ============================================================================
// Configuration
// ============================================================================

pub use config::{
    AppConfig, BatchConfig, CircuitBreakerConfig, PlatformConfig, RateLimitConfig, RetryConfig,
    Side, config_dir, config_file_path, load_config, load_config_from,
};

// ============================================================================
// Resilience
// ============================================================================

pub use circuit_breaker::{BreakerError, CircuitBreaker, CircuitState};
pub use classify::{ClassifiedError, ErrorKind, classify, retryable};
pub use retry::{RetryError, RetryPolicy, Retryer};

// ============================================================================
// GitHub Integration
// ============================================================================

pub use github::auth::{AuthStrategy, Credential, CredentialError, TokenSource};
pub use github::client::{ClientError, ClientOptions, GitHubClient, HttpFailure};
pub use github::migrations::{MigrationClient, RemoteMigrationState, StartMigration};
pub use github::ratelimit::{RateLimitSnapshot, RateLimiter, RateLimiterOptions};
pub use github::router::{ClientRouter, OperationClass};
pub use github::topology::InstanceTopology;

// ============================================================================
// Migration State
// ============================================================================

pub use batch::{
    Batch, BatchAggregator, BatchError, BatchId, BatchRepository, BatchStatus, BatchStore,
    RecomputeOutcome, RecomputeReport, compute_batch_status,
};
pub use migration::{PhaseTransitionError, RepositoryMigrationPhase};

// ============================================================================
// Modules
// ============================================================================

pub mod batch;
pub mod circuit_breaker;
pub mod classify;
pub mod config;
pub mod error;
pub mod github;
pub mod migration;
pub mod retry;
