// SPDX-License-Identifier: Apache-2.0

//! Credential-aware client selection.
//!
//! One platform instance can be reached with up to three credentials: a
//! personal access token, an app installation token, and the app JWT. Each
//! credential has its own quota, so each client owns its own rate limiter.
//!
//! Selection rules:
//! - migration control always uses the personal token
//! - discovery and profiling prefer the installation token and fall back to
//!   the personal token
//! - listing app installations needs the app JWT

use std::fmt;

use serde::Serialize;
use tracing::{debug, info, instrument};

use super::auth::{AuthStrategy, Credential, CredentialError};
use super::client::{ClientError, ClientOptions, GitHubClient};
use super::migrations::MigrationClient;
use super::ratelimit::RateLimiterOptions;
use crate::config::PlatformConfig;
use crate::retry::RetryPolicy;

/// Kind of work a caller wants a client for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    /// Creating, starting, polling, and unlocking migrations.
    MigrationControl,
    /// Enumerating organizations and repositories.
    Discovery,
    /// Reading repository details for sizing and planning.
    Profiling,
    /// Enumerating installations of the app itself.
    AppInstallations,
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MigrationControl => write!(f, "migration control"),
            Self::Discovery => write!(f, "discovery"),
            Self::Profiling => write!(f, "profiling"),
            Self::AppInstallations => write!(f, "app installations"),
        }
    }
}

/// The clients configured for one platform instance.
#[derive(Debug, Clone)]
pub struct ClientRouter {
    personal: Option<MigrationClient>,
    installation: Option<GitHubClient>,
    app: Option<GitHubClient>,
}

impl ClientRouter {
    /// Builds every client the configuration has credentials for.
    ///
    /// # Arguments
    ///
    /// * `platform` - Instance URL, credentials and transport settings
    /// * `retry` - Retry policy shared by every client
    /// * `rate_limit` - Limiter tunables; each client gets its own limiter
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Missing`] (wrapped) if no credential is
    /// configured, or the first client construction failure.
    #[instrument(skip_all, fields(base_url = %platform.base_url))]
    pub fn new(
        platform: &PlatformConfig,
        retry: RetryPolicy,
        rate_limit: RateLimiterOptions,
    ) -> Result<Self, ClientError> {
        let build = |credential: Credential| {
            let options = ClientOptions::builder()
                .base_url(platform.base_url.clone())
                .timeout(platform.timeout())
                .max_idle_per_host(platform.max_idle_connections_per_host)
                .retry(retry)
                .rate_limit(rate_limit)
                .build();
            GitHubClient::new(options, credential)
        };

        let personal = match Credential::personal(platform) {
            Ok(credential) => MigrationClient::new(build(credential)?).ok(),
            Err(_) => None,
        };

        let installation = match Credential::resolve(platform) {
            Ok(credential @ Credential::AppInstallation { .. }) => Some(build(credential)?),
            Ok(_) | Err(CredentialError::Missing) => None,
            Err(err) => return Err(err.into()),
        };

        let app = match Credential::app_jwt(platform) {
            Ok(credential) => Some(build(credential)?),
            Err(CredentialError::AppCredentialsRequired) => None,
            Err(err) => return Err(err.into()),
        };

        if personal.is_none() && installation.is_none() && app.is_none() {
            return Err(CredentialError::Missing.into());
        }

        info!(
            personal = personal.is_some(),
            installation = installation.is_some(),
            app = app.is_some(),
            "Client router ready"
        );

        Ok(Self {
            personal,
            installation,
            app,
        })
    }

    /// The personal-token client used for migration control.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::PersonalTokenRequired`] if no personal
    /// token is configured. There is no fallback to app credentials.
    pub fn migration_client(&self) -> Result<&MigrationClient, CredentialError> {
        self.personal
            .as_ref()
            .ok_or(CredentialError::PersonalTokenRequired)
    }

    /// The client to use for `class`.
    ///
    /// # Errors
    ///
    /// - [`CredentialError::PersonalTokenRequired`] for migration control without a personal token
    /// - [`CredentialError::AppCredentialsRequired`] for app installations without app credentials
    /// - [`CredentialError::Missing`] for discovery or profiling with only the app JWT
    pub fn for_operation(&self, class: OperationClass) -> Result<&GitHubClient, CredentialError> {
        let client = match class {
            OperationClass::MigrationControl => {
                self.migration_client().map(|client| &**client)?
            }
            OperationClass::Discovery | OperationClass::Profiling => self
                .installation
                .as_ref()
                .or(self.personal.as_deref())
                .ok_or(CredentialError::Missing)?,
            OperationClass::AppInstallations => self
                .app
                .as_ref()
                .ok_or(CredentialError::AppCredentialsRequired)?,
        };
        debug!(%class, strategy = %client.strategy(), "Client selected");
        Ok(client)
    }

    /// Every configured client with its strategy, personal token first.
    #[must_use]
    pub fn clients(&self) -> Vec<(AuthStrategy, &GitHubClient)> {
        self.personal
            .as_deref()
            .into_iter()
            .chain(self.installation.as_ref())
            .chain(self.app.as_ref())
            .map(|client| (client.strategy(), client))
            .collect()
    }
}
