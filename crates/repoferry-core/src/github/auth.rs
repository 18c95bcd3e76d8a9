// SPDX-License-Identifier: Apache-2.0

//! Credential resolution and token sources.
//!
//! A [`Credential`] is resolved once from configuration, by precedence:
//! 1. App id + private key + installation id (installation token)
//! 2. App id + private key alone (app JWT, app-level discovery only)
//! 3. Personal access token
//!
//! Each credential backs one shared [`TokenSource`]. JWT and installation
//! tokens are cached behind an async `RwLock`: concurrent callers take the
//! read fast path, and only the first caller after expiry refreshes.

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use octocrab::models::{AppId, InstallationId};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderValue, USER_AGENT};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use super::API_VERSION;
use crate::config::PlatformConfig;

/// App JWT lifetime; the platform rejects anything above ten minutes.
const JWT_LIFETIME_SECS: i64 = 9 * 60;

/// Backdating applied to `iat` to absorb clock drift.
const JWT_CLOCK_DRIFT_SECS: i64 = 60;

/// A cached JWT is replaced this long before it expires.
const JWT_REFRESH_MARGIN_SECS: i64 = 60;

/// A cached installation token is replaced this long before it expires.
const INSTALLATION_REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// Errors raised while resolving credentials or minting tokens.
#[derive(Error, Debug)]
pub enum CredentialError {
    /// Neither app credentials nor a personal token are configured.
    #[error(
        "No credentials configured. Set a personal access token, or an app id and private key"
    )]
    Missing,

    /// The operation is only permitted with a personal access token.
    #[error("A personal access token is required for migration-control operations")]
    PersonalTokenRequired,

    /// The operation needs app credentials.
    #[error("App id and private key are required for app-level operations")]
    AppCredentialsRequired,

    /// The private key file could not be read.
    #[error("Failed to read app private key from {path}: {source}")]
    KeyFile {
        /// Path that was read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The private key is not a valid RSA PEM key.
    #[error("Invalid app private key: {0}")]
    InvalidKey(#[source] jsonwebtoken::errors::Error),

    /// Signing the app JWT failed.
    #[error("Failed to sign app JWT: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),

    /// The installation token exchange was rejected.
    #[error("Installation token exchange failed (HTTP {status}): {message}")]
    TokenExchange {
        /// HTTP status of the exchange response.
        status: u16,
        /// Response body.
        message: String,
    },

    /// The installation token exchange did not complete.
    #[error("Installation token request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Credential material, resolved once and immutable thereafter.
#[derive(Debug)]
pub enum Credential {
    /// A personal access token.
    PersonalAccessToken(SecretString),
    /// An app installation; tokens are exchanged from the app JWT.
    AppInstallation {
        /// App identifier.
        app_id: AppId,
        /// PEM text of the app private key.
        private_key: SecretString,
        /// Installation identifier.
        installation_id: InstallationId,
    },
    /// The app itself; used only for app-level calls such as listing installations.
    AppJwtOnly {
        /// App identifier.
        app_id: AppId,
        /// PEM text of the app private key.
        private_key: SecretString,
    },
}

/// Which credential strategy a client authenticates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStrategy {
    /// Personal access token.
    PersonalAccessToken,
    /// App installation token.
    AppInstallation,
    /// App JWT.
    AppJwt,
}

impl fmt::Display for AuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthStrategy::PersonalAccessToken => write!(f, "personal access token"),
            AuthStrategy::AppInstallation => write!(f, "app installation"),
            AuthStrategy::AppJwt => write!(f, "app JWT"),
        }
    }
}

impl Credential {
    /// Resolves the preferred credential for general traffic.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Missing`] if nothing usable is configured,
    /// or a key error if the private key cannot be loaded.
    pub fn resolve(config: &PlatformConfig) -> Result<Self, CredentialError> {
        if let (Some(app_id), Some(key)) = (config.app_id, config.app_private_key.as_ref()) {
            let private_key = load_private_key(key)?;
            return Ok(match config.app_installation_id {
                Some(installation_id) => Self::AppInstallation {
                    app_id: AppId(app_id),
                    private_key,
                    installation_id: InstallationId(installation_id),
                },
                None => Self::AppJwtOnly {
                    app_id: AppId(app_id),
                    private_key,
                },
            });
        }

        Self::personal(config).map_err(|_| CredentialError::Missing)
    }

    /// Resolves the personal access token.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::PersonalTokenRequired`] if no token is configured.
    pub fn personal(config: &PlatformConfig) -> Result<Self, CredentialError> {
        config
            .token
            .as_ref()
            .filter(|token| !token.expose_secret().trim().is_empty())
            .map(|token| Self::PersonalAccessToken(copy_secret(token)))
            .ok_or(CredentialError::PersonalTokenRequired)
    }

    /// Resolves the app-level JWT credential.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::AppCredentialsRequired`] if the app id or
    /// private key is missing.
    pub fn app_jwt(config: &PlatformConfig) -> Result<Self, CredentialError> {
        match (config.app_id, config.app_private_key.as_ref()) {
            (Some(app_id), Some(key)) => Ok(Self::AppJwtOnly {
                app_id: AppId(app_id),
                private_key: load_private_key(key)?,
            }),
            _ => Err(CredentialError::AppCredentialsRequired),
        }
    }

    /// Strategy this credential authenticates with.
    #[must_use]
    pub fn strategy(&self) -> AuthStrategy {
        match self {
            Self::PersonalAccessToken(_) => AuthStrategy::PersonalAccessToken,
            Self::AppInstallation { .. } => AuthStrategy::AppInstallation,
            Self::AppJwtOnly { .. } => AuthStrategy::AppJwt,
        }
    }

    /// Builds the shared token source backing this credential.
    ///
    /// # Arguments
    ///
    /// * `http` - Transport used for installation token exchange
    /// * `rest_base` - REST API root of the instance
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::InvalidKey`] if the private key is not RSA PEM.
    #[instrument(skip(self, http), fields(strategy = %self.strategy()))]
    pub fn into_token_source(
        self,
        http: reqwest::Client,
        rest_base: &str,
    ) -> Result<Arc<dyn TokenSource>, CredentialError> {
        let source: Arc<dyn TokenSource> = match self {
            Self::PersonalAccessToken(token) => Arc::new(StaticToken { token }),
            Self::AppJwtOnly {
                app_id,
                private_key,
            } => Arc::new(AppJwtSource::new(app_id, &private_key)?),
            Self::AppInstallation {
                app_id,
                private_key,
                installation_id,
            } => Arc::new(InstallationTokenSource {
                jwt: AppJwtSource::new(app_id, &private_key)?,
                installation_id,
                http,
                rest_base: rest_base.trim_end_matches('/').to_string(),
                cache: RwLock::new(None),
            }),
        };
        info!("Credential resolved");
        Ok(source)
    }
}

fn copy_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_owned())
}

/// Accepts PEM text directly, or a path to a PEM file.
fn load_private_key(raw: &SecretString) -> Result<SecretString, CredentialError> {
    let value = raw.expose_secret().trim();
    if value.starts_with("-----BEGIN") {
        return Ok(SecretString::from(value.to_owned()));
    }

    let path = Path::new(value);
    debug!(path = %path.display(), "Loading app private key from file");
    std::fs::read_to_string(path)
        .map(SecretString::from)
        .map_err(|source| CredentialError::KeyFile {
            path: value.to_string(),
            source,
        })
}

/// Supplies the `Authorization` header value for outbound calls.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Returns the full header value, e.g. `token <pat>` or `Bearer <jwt>`.
    async fn authorization(&self) -> Result<SecretString, CredentialError>;

    /// Strategy backing this source.
    fn strategy(&self) -> AuthStrategy;
}

impl fmt::Debug for dyn TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSource")
            .field("strategy", &self.strategy())
            .finish_non_exhaustive()
    }
}

/// A token with the instant after which it must be refreshed.
struct CachedToken {
    value: SecretString,
    refresh_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Utc::now() < self.refresh_at
    }
}

async fn cached_or_refresh<F, Fut>(
    cache: &RwLock<Option<CachedToken>>,
    refresh: F,
) -> Result<SecretString, CredentialError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<CachedToken, CredentialError>>,
{
    {
        let guard = cache.read().await;
        if let Some(token) = guard.as_ref()
            && token.is_fresh()
        {
            return Ok(copy_secret(&token.value));
        }
    }

    let mut guard = cache.write().await;
    if let Some(token) = guard.as_ref()
        && token.is_fresh()
    {
        return Ok(copy_secret(&token.value));
    }

    let token = refresh().await?;
    let value = copy_secret(&token.value);
    *guard = Some(token);
    Ok(value)
}

struct StaticToken {
    token: SecretString,
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn authorization(&self) -> Result<SecretString, CredentialError> {
        Ok(SecretString::from(format!(
            "token {}",
            self.token.expose_secret()
        )))
    }

    fn strategy(&self) -> AuthStrategy {
        AuthStrategy::PersonalAccessToken
    }
}

/// Registered JWT claims for app authentication.
#[derive(Debug, Serialize, Deserialize)]
pub struct AppClaims {
    /// Issued at, backdated for clock drift.
    pub iat: i64,
    /// Expiry.
    pub exp: i64,
    /// App id.
    pub iss: String,
}

struct AppJwtSource {
    app_id: AppId,
    key: EncodingKey,
    cache: RwLock<Option<CachedToken>>,
}

impl AppJwtSource {
    fn new(app_id: AppId, private_key: &SecretString) -> Result<Self, CredentialError> {
        let key = EncodingKey::from_rsa_pem(private_key.expose_secret().as_bytes())
            .map_err(CredentialError::InvalidKey)?;
        Ok(Self {
            app_id,
            key,
            cache: RwLock::new(None),
        })
    }

    fn sign(&self) -> Result<CachedToken, CredentialError> {
        let now = Utc::now();
        let claims = AppClaims {
            iat: (now - ChronoDuration::seconds(JWT_CLOCK_DRIFT_SECS)).timestamp(),
            exp: (now + ChronoDuration::seconds(JWT_LIFETIME_SECS)).timestamp(),
            iss: self.app_id.to_string(),
        };
        let jwt = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(CredentialError::Signing)?;
        debug!(app_id = %self.app_id, "Signed app JWT");

        Ok(CachedToken {
            value: SecretString::from(jwt),
            refresh_at: now + ChronoDuration::seconds(JWT_LIFETIME_SECS - JWT_REFRESH_MARGIN_SECS),
        })
    }

    async fn jwt(&self) -> Result<SecretString, CredentialError> {
        cached_or_refresh(&self.cache, || async { self.sign() }).await
    }
}

#[async_trait]
impl TokenSource for AppJwtSource {
    async fn authorization(&self) -> Result<SecretString, CredentialError> {
        let jwt = self.jwt().await?;
        Ok(SecretString::from(format!("Bearer {}", jwt.expose_secret())))
    }

    fn strategy(&self) -> AuthStrategy {
        AuthStrategy::AppJwt
    }
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

struct InstallationTokenSource {
    jwt: AppJwtSource,
    installation_id: InstallationId,
    http: reqwest::Client,
    rest_base: String,
    cache: RwLock<Option<CachedToken>>,
}

impl InstallationTokenSource {
    #[instrument(skip(self), fields(installation_id = %self.installation_id))]
    async fn exchange(&self) -> Result<CachedToken, CredentialError> {
        let jwt = self.jwt.jwt().await?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.rest_base, self.installation_id
        );

        let mut bearer = HeaderValue::try_from(format!("Bearer {}", jwt.expose_secret()))
            .map_err(|_| CredentialError::TokenExchange {
                status: 0,
                message: "app JWT is not a valid header value".to_string(),
            })?;
        bearer.set_sensitive(true);

        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, bearer)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .header(USER_AGENT, concat!("repoferry/", env!("CARGO_PKG_VERSION")))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CredentialError::TokenExchange {
                status: status.as_u16(),
                message,
            });
        }

        let body: AccessTokenResponse = response.json().await?;
        info!(expires_at = %body.expires_at, "Installation token refreshed");

        Ok(CachedToken {
            value: SecretString::from(body.token),
            refresh_at: body.expires_at - ChronoDuration::seconds(INSTALLATION_REFRESH_MARGIN_SECS),
        })
    }
}

#[async_trait]
impl TokenSource for InstallationTokenSource {
    async fn authorization(&self) -> Result<SecretString, CredentialError> {
        let token = cached_or_refresh(&self.cache, || self.exchange()).await?;
        Ok(SecretString::from(format!("Bearer {}", token.expose_secret())))
    }

    fn strategy(&self) -> AuthStrategy {
        AuthStrategy::AppInstallation
    }
}
