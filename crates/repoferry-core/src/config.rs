// SPDX-License-Identifier: Apache-2.0

//! Configuration management for Repoferry.
//!
//! Provides layered configuration from files and environment variables.
//! Uses XDG-compliant paths with environment variable support.
//!
//! # Configuration Sources (in priority order)
//!
//! 1. Environment variables (prefix: `REPOFERRY_`)
//! 2. Config file: `~/.config/repoferry/config.toml`
//! 3. Built-in defaults
//!
//! # Examples
//!
//! ```bash
//! # Supply the source personal access token via environment variable
//! REPOFERRY_SOURCE__TOKEN=ghp_xxx repoferry rate-limit
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::circuit_breaker::{CircuitBreaker, DEFAULT_MAX_FAILURES, DEFAULT_RESET_TIMEOUT};
use crate::error::ConfigError;
use crate::github::ratelimit::RateLimiterOptions;
use crate::retry::{DEFAULT_MAX_ATTEMPTS, RetryPolicy};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "REPOFERRY";

/// Application configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Instance repositories are migrated from.
    pub source: PlatformConfig,
    /// Instance repositories are migrated to.
    pub destination: PlatformConfig,
    /// Retry tunables.
    pub retry: RetryConfig,
    /// Rate limiter tunables.
    pub rate_limit: RateLimitConfig,
    /// Circuit breaker tunables.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Batch aggregator tunables.
    pub batch: BatchConfig,
}

/// Which end of a migration a platform setting belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Instance repositories are migrated from.
    Source,
    /// Instance repositories are migrated to.
    Destination,
}

impl Side {
    /// Both sides, source first.
    pub const BOTH: [Self; 2] = [Self::Source, Self::Destination];

    /// Returns the lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Destination => "destination",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AppConfig {
    /// Platform settings of one side.
    #[must_use]
    pub fn platform(&self, side: Side) -> &PlatformConfig {
        match side {
            Side::Source => &self.source,
            Side::Destination => &self.destination,
        }
    }

    /// Checks values the type system cannot.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| {
            Err(ConfigError::Invalid {
                message: message.to_string(),
            })
        };

        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if self.retry.backoff_multiplier < 1.0 {
            return invalid("retry.backoff_multiplier must be at least 1.0");
        }
        if self.retry.blocked_wait_floor_seconds > self.retry.blocked_wait_ceiling_seconds {
            return invalid("retry.blocked_wait_floor_seconds exceeds blocked_wait_ceiling_seconds");
        }
        if self.rate_limit.backoff_floor_seconds > self.rate_limit.backoff_ceiling_seconds {
            return invalid("rate_limit.backoff_floor_seconds exceeds backoff_ceiling_seconds");
        }
        if self.batch.tick_interval_seconds == 0 {
            return invalid("batch.tick_interval_seconds must be positive");
        }
        if self.circuit_breaker.max_failures == 0 {
            return invalid("circuit_breaker.max_failures must be at least 1");
        }
        Ok(())
    }
}

/// Connection and credential settings for one platform instance.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Base URL; empty means the public cloud.
    pub base_url: String,
    /// Personal access token.
    pub token: Option<SecretString>,
    /// App id.
    pub app_id: Option<u64>,
    /// App private key, as PEM text or a path to a PEM file.
    pub app_private_key: Option<SecretString>,
    /// App installation id.
    pub app_installation_id: Option<u64>,
    /// Per-request timeout.
    pub timeout_seconds: u64,
    /// Idle connections kept per host.
    pub max_idle_connections_per_host: usize,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: None,
            app_id: None,
            app_private_key: None,
            app_installation_id: None,
            timeout_seconds: 30,
            max_idle_connections_per_host: 100,
        }
    }
}

impl PlatformConfig {
    /// Per-request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Whether app id and private key are both set.
    #[must_use]
    pub fn has_app_credentials(&self) -> bool {
        self.app_id.is_some() && self.app_private_key.is_some()
    }
}

/// Retry settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per operation, including the first.
    pub max_attempts: usize,
    /// First backoff delay in milliseconds.
    pub initial_backoff_ms: u64,
    /// Backoff cap in milliseconds.
    pub max_backoff_ms: u64,
    /// Backoff growth factor.
    pub backoff_multiplier: f32,
    /// Fixed wait after a secondary rate limit.
    pub secondary_rate_limit_wait_seconds: u64,
    /// Lower bound of the pre-emptive block wait.
    pub blocked_wait_floor_seconds: u64,
    /// Upper bound of the pre-emptive block wait.
    pub blocked_wait_ceiling_seconds: u64,
    /// Padding added to a pre-emptive block countdown.
    pub blocked_wait_padding_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            secondary_rate_limit_wait_seconds: 60,
            blocked_wait_floor_seconds: 10,
            blocked_wait_ceiling_seconds: 15 * 60,
            blocked_wait_padding_seconds: 5,
        }
    }
}

impl RetryConfig {
    /// Builds the retry policy.
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            backoff_multiplier: self.backoff_multiplier,
            secondary_rate_limit_wait: Duration::from_secs(self.secondary_rate_limit_wait_seconds),
            blocked_wait_floor: Duration::from_secs(self.blocked_wait_floor_seconds),
            blocked_wait_ceiling: Duration::from_secs(self.blocked_wait_ceiling_seconds),
            blocked_wait_padding: Duration::from_secs(self.blocked_wait_padding_seconds),
        }
    }
}

/// Rate limiter settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Minimum spacing between calls in milliseconds.
    pub min_request_interval_ms: u64,
    /// First reset-unknown backoff delay.
    pub backoff_floor_seconds: u64,
    /// Reset-unknown backoff cap.
    pub backoff_ceiling_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_request_interval_ms: 100,
            backoff_floor_seconds: 1,
            backoff_ceiling_seconds: 300,
        }
    }
}

impl RateLimitConfig {
    /// Builds the limiter options.
    #[must_use]
    pub fn options(&self) -> RateLimiterOptions {
        RateLimiterOptions {
            min_interval: Duration::from_millis(self.min_request_interval_ms),
            backoff_floor: Duration::from_secs(self.backoff_floor_seconds),
            backoff_ceiling: Duration::from_secs(self.backoff_ceiling_seconds),
        }
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening.
    pub max_failures: u32,
    /// Seconds in the open state before probing.
    pub reset_timeout_seconds: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: DEFAULT_MAX_FAILURES,
            reset_timeout_seconds: DEFAULT_RESET_TIMEOUT.as_secs(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Builds a breaker.
    #[must_use]
    pub fn build(&self) -> CircuitBreaker {
        CircuitBreaker::new(
            self.max_failures,
            Duration::from_secs(self.reset_timeout_seconds),
        )
    }
}

/// Batch aggregator settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Seconds between recomputation passes.
    pub tick_interval_seconds: u64,
    /// Retries per storage call.
    pub storage_retry_attempts: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: 30,
            storage_retry_attempts: 3,
        }
    }
}

impl BatchConfig {
    /// Interval between recomputation passes.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_seconds)
    }
}

/// Returns the Repoferry configuration directory.
///
/// Respects the `XDG_CONFIG_HOME` environment variable if set,
/// otherwise defaults to `~/.config/repoferry`.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME")
        && !xdg_config.is_empty()
    {
        return PathBuf::from(xdg_config).join("repoferry");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("repoferry")
}

/// Returns the path to the configuration file.
#[must_use]
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Load application configuration from the default location.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file exists but is invalid, or a value
/// fails validation.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path())
}

/// Load application configuration from `path` and the environment.
///
/// The file is optional. Environment variables use the prefix `REPOFERRY_`
/// and double underscore for nested keys (e.g., `REPOFERRY_RETRY__MAX_ATTEMPTS`).
///
/// # Errors
///
/// Returns [`ConfigError`] if the file exists but is invalid, or a value
/// fails validation.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::from(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;
    app_config.validate()?;

    Ok(app_config)
}
