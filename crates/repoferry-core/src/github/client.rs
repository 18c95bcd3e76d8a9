// SPDX-License-Identifier: Apache-2.0

//! Authenticated REST and GraphQL client.
//!
//! Every call passes through the client's [`Retryer`], which gates it on the
//! shared [`RateLimiter`]. Quota headers are read from every received
//! response, success or failure, and each call emits one structured event
//! with its duration, classified outcome, and the updated quota.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use bon::Builder;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, LINK};
use reqwest::Method;
use secrecy::ExposeSecret;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::auth::{AuthStrategy, Credential, CredentialError, TokenSource};
use super::graphql::GraphQlResponse;
use super::ratelimit::{RateLimitSnapshot, RateLimiter, RateLimiterOptions};
use super::topology::{self, InstanceTopology};
use super::API_VERSION;
use crate::circuit_breaker::{BreakerError, CircuitBreaker};
use crate::classify::classify_kind;
use crate::retry::{RetryError, RetryPolicy, Retryer, millis};

const GITHUB_MEDIA_TYPE: &str = "application/vnd.github+json";

fn default_user_agent() -> String {
    concat!("repoferry/", env!("CARGO_PKG_VERSION")).to_string()
}

/// A non-2xx response.
///
/// The body is kept as text because intermediaries may answer with HTML.
#[derive(Error, Debug, Clone)]
#[error("HTTP {status}: {body}")]
pub struct HttpFailure {
    /// Response status code.
    pub status: u16,
    /// Value of the remaining-quota header, when present.
    pub rate_limit_remaining: Option<u32>,
    /// Response body.
    pub body: String,
}

/// Errors raised while constructing a client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Credential resolution failed.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// The HTTP transport could not be built.
    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Transport settings for one client.
#[derive(Debug, Clone, Builder)]
pub struct ClientOptions {
    /// Instance base URL; empty means the public cloud.
    #[builder(default, into)]
    pub base_url: String,
    /// Per-request timeout.
    #[builder(default = Duration::from_secs(30))]
    pub timeout: Duration,
    /// Idle connections kept per host.
    #[builder(default = 100)]
    pub max_idle_per_host: usize,
    /// Retry tunables.
    #[builder(default)]
    pub retry: RetryPolicy,
    /// Rate limiter tunables, used when the client owns its limiter.
    #[builder(default)]
    pub rate_limit: RateLimiterOptions,
    /// `User-Agent` header value.
    #[builder(default = default_user_agent(), into)]
    pub user_agent: String,
}

/// A successful response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// Response status code.
    pub status: u16,
    /// Response body.
    pub body: String,
    /// `rel="next"` URL of a paginated listing.
    pub next: Option<String>,
}

/// Authenticated client bound to one platform instance and credential.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    token: Arc<dyn TokenSource>,
    base_url: String,
    retryer: Retryer,
}

impl GitHubClient {
    /// Creates a client that owns its rate limiter.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the transport cannot be built or the
    /// credential's key material is invalid.
    pub fn new(options: ClientOptions, credential: Credential) -> Result<Self, ClientError> {
        let limiter = Arc::new(RateLimiter::new(options.rate_limit));
        Self::with_limiter(options, credential, limiter)
    }

    /// Creates a client that shares `limiter` with other clients on the same quota.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the transport cannot be built or the
    /// credential's key material is invalid.
    #[instrument(skip(options, credential, limiter), fields(base_url = %options.base_url))]
    pub fn with_limiter(
        options: ClientOptions,
        credential: Credential,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .pool_max_idle_per_host(options.max_idle_per_host)
            .user_agent(options.user_agent.as_str())
            .build()?;

        let rest_base = topology::rest_base(&options.base_url);
        let token = credential.into_token_source(http.clone(), &rest_base)?;

        info!(
            topology = %InstanceTopology::detect(&options.base_url),
            strategy = %token.strategy(),
            "Platform client created"
        );

        Ok(Self {
            http,
            token,
            base_url: options.base_url,
            retryer: Retryer::new(options.retry, limiter),
        })
    }

    /// Instance base URL as configured.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Hosting mode of the instance.
    #[must_use]
    pub fn topology(&self) -> InstanceTopology {
        InstanceTopology::detect(&self.base_url)
    }

    /// REST API root.
    #[must_use]
    pub fn rest_base(&self) -> String {
        topology::rest_base(&self.base_url)
    }

    /// GraphQL endpoint.
    #[must_use]
    pub fn graphql_url(&self) -> String {
        topology::graphql_endpoint(&self.base_url)
    }

    /// Browser URL of an `owner/repo` repository.
    #[must_use]
    pub fn web_url(&self, owner_repo: &str) -> String {
        topology::web_url(&self.base_url, owner_repo)
    }

    /// Credential strategy of this client.
    #[must_use]
    pub fn strategy(&self) -> AuthStrategy {
        self.token.strategy()
    }

    /// Shared rate limiter.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        self.retryer.limiter()
    }

    /// Last observed quota.
    #[must_use]
    pub fn rate_limit_status(&self) -> RateLimitSnapshot {
        self.limiter().get_status()
    }

    /// Resolves a REST path against the API root; absolute URLs pass through.
    #[must_use]
    pub fn rest_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.rest_base(), path.trim_start_matches('/'))
        }
    }

    /// Runs `attempt` in the retry loop of this client.
    ///
    /// This is the general call primitive for work the typed helpers do not
    /// cover.
    ///
    /// # Errors
    ///
    /// See [`Retryer::run_with`].
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        attempt: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.retryer.run_with(operation, cancel, attempt).await
    }

    /// Runs `attempt` in the retry loop, behind `breaker`.
    ///
    /// # Errors
    ///
    /// See [`CircuitBreaker::call`].
    pub async fn run_guarded<T, F, Fut>(
        &self,
        breaker: &CircuitBreaker,
        operation: &str,
        cancel: &CancellationToken,
        attempt: F,
    ) -> Result<T, BreakerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        breaker
            .call(|| self.retryer.run_with(operation, cancel, attempt))
            .await
    }

    /// Sends one request without retrying.
    ///
    /// # Errors
    ///
    /// Returns [`HttpFailure`] for non-2xx responses, or the transport or
    /// credential error.
    pub async fn send(
        &self,
        operation: &str,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> anyhow::Result<RawResponse> {
        let start = Instant::now();
        let result = self.execute(method, url, body).await;
        self.record(operation, start, &result);
        result
    }

    async fn execute(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> anyhow::Result<RawResponse> {
        let authorization = self.token.authorization().await?;
        let mut auth_value = HeaderValue::try_from(authorization.expose_secret())
            .context("Authorization token is not a valid header value")?;
        auth_value.set_sensitive(true);

        let mut request = self
            .http
            .request(method, url)
            .header(AUTHORIZATION, auth_value)
            .header(ACCEPT, GITHUB_MEDIA_TYPE)
            .header("X-GitHub-Api-Version", API_VERSION);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let quota = RateLimitSnapshot::from_headers(response.headers());
        if let Some(quota) = quota {
            self.limiter()
                .update_limits(quota.remaining, quota.limit, quota.reset_at);
        }
        let next = next_link(response.headers());
        let text = response.text().await?;

        if status.is_success() {
            Ok(RawResponse {
                status: status.as_u16(),
                body: text,
                next,
            })
        } else {
            Err(HttpFailure {
                status: status.as_u16(),
                rate_limit_remaining: quota.map(|q| q.remaining),
                body: text,
            }
            .into())
        }
    }

    fn record<T>(&self, operation: &str, start: Instant, result: &anyhow::Result<T>) {
        let quota = self.rate_limit_status();
        let duration_ms = millis(start.elapsed());
        match result {
            Ok(_) => debug!(
                operation,
                duration_ms,
                outcome = "ok",
                remaining = quota.remaining,
                limit = quota.limit,
                reset_at = ?quota.reset_at,
                "Platform call completed"
            ),
            Err(err) => warn!(
                operation,
                duration_ms,
                outcome = classify_kind(err).as_str(),
                remaining = quota.remaining,
                limit = quota.limit,
                reset_at = ?quota.reset_at,
                "Platform call completed"
            ),
        }
    }

    /// GETs a REST resource and deserializes it.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError`] once retries are exhausted, on a terminal
    /// failure, or on cancellation.
    pub async fn get<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<T, RetryError> {
        let url = self.rest_url(path);
        let url = url.as_str();
        self.run(operation, cancel, move || async move {
            let raw = self.send(operation, Method::GET, url, None).await?;
            parse_body(&raw.body)
        })
        .await
    }

    /// GETs every page of a REST listing, following `rel="next"` links.
    ///
    /// Each page is retried independently.
    ///
    /// # Errors
    ///
    /// Returns the first page's [`RetryError`].
    pub async fn get_all_pages<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>, RetryError> {
        let mut items = Vec::new();
        let mut next = Some(self.rest_url(path));

        while let Some(page_url) = next.take() {
            let url = page_url.as_str();
            let (page, following): (Vec<T>, Option<String>) = self
                .run(operation, cancel, move || async move {
                    let raw = self.send(operation, Method::GET, url, None).await?;
                    Ok((parse_body(&raw.body)?, raw.next))
                })
                .await?;
            items.extend(page);
            next = following;
        }

        Ok(items)
    }

    /// POSTs a JSON body to a REST resource.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError`] once retries are exhausted, on a terminal
    /// failure, or on cancellation.
    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<T, RetryError> {
        let url = self.rest_url(path);
        let url = url.as_str();
        self.run(operation, cancel, move || async move {
            let payload = serde_json::to_value(body).context("Failed to encode request body")?;
            let raw = self.send(operation, Method::POST, url, Some(&payload)).await?;
            parse_body(&raw.body)
        })
        .await
    }

    /// DELETEs a REST resource.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError`] once retries are exhausted, on a terminal
    /// failure, or on cancellation.
    pub async fn delete(
        &self,
        operation: &str,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<(), RetryError> {
        let url = self.rest_url(path);
        let url = url.as_str();
        self.run(operation, cancel, move || async move {
            self.send(operation, Method::DELETE, url, None).await?;
            Ok(())
        })
        .await
    }

    /// Runs a GraphQL query.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError`] once retries are exhausted, on a terminal
    /// failure (including typed GraphQL errors), or on cancellation.
    pub async fn query<T: DeserializeOwned>(
        &self,
        operation: &str,
        query: &str,
        variables: Value,
        cancel: &CancellationToken,
    ) -> Result<T, RetryError> {
        self.graphql(operation, query, variables, cancel).await
    }

    /// Runs a GraphQL mutation.
    ///
    /// # Errors
    ///
    /// Same as [`GitHubClient::query`].
    pub async fn mutate<T: DeserializeOwned>(
        &self,
        operation: &str,
        mutation: &str,
        variables: Value,
        cancel: &CancellationToken,
    ) -> Result<T, RetryError> {
        self.graphql(operation, mutation, variables, cancel).await
    }

    async fn graphql<T: DeserializeOwned>(
        &self,
        operation: &str,
        document: &str,
        variables: Value,
        cancel: &CancellationToken,
    ) -> Result<T, RetryError> {
        let url = self.graphql_url();
        let url = url.as_str();
        let payload = json!({ "query": document, "variables": variables });
        let payload = &payload;
        self.run(operation, cancel, move || async move {
            let raw = self.send(operation, Method::POST, url, Some(payload)).await?;
            let response: GraphQlResponse<T> = parse_body(&raw.body)?;
            response.into_result()
        })
        .await
    }
}

fn parse_body<T: DeserializeOwned>(body: &str) -> anyhow::Result<T> {
    serde_json::from_str(body).context("Failed to parse response body")
}

/// Extracts the `rel="next"` URL from a `Link` header.
fn next_link(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(LINK)?.to_str().ok()?;
    value.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        params
            .split(';')
            .any(|param| param.trim() == r#"rel="next""#)
            .then(|| {
                target
                    .trim()
                    .trim_start_matches('<')
                    .trim_end_matches('>')
                    .to_string()
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use tracing_test::traced_test;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: &str) -> GitHubClient {
        GitHubClient::new(
            ClientOptions::builder().base_url(base_url).build(),
            Credential::PersonalAccessToken(SecretString::from("ghp_test")),
        )
        .unwrap()
    }

    #[test]
    fn test_next_link() {
        let mut headers = HeaderMap::new();
        headers.insert(
            LINK,
            HeaderValue::from_static(
                r#"<https://api.github.com/orgs/o/repos?page=2>; rel="next", <https://api.github.com/orgs/o/repos?page=5>; rel="last""#,
            ),
        );
        assert_eq!(
            next_link(&headers).as_deref(),
            Some("https://api.github.com/orgs/o/repos?page=2")
        );
    }

    #[test]
    fn test_next_link_absent_on_last_page() {
        let mut headers = HeaderMap::new();
        headers.insert(
            LINK,
            HeaderValue::from_static(
                r#"<https://api.github.com/orgs/o/repos?page=1>; rel="prev", <https://api.github.com/orgs/o/repos?page=1>; rel="first""#,
            ),
        );
        assert!(next_link(&headers).is_none());
        assert!(next_link(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_http_failure_display() {
        let failure = HttpFailure {
            status: 502,
            rate_limit_remaining: None,
            body: "<html>Bad Gateway</html>".to_string(),
        };
        assert_eq!(failure.to_string(), "HTTP 502: <html>Bad Gateway</html>");
    }

    #[test]
    fn test_endpoints_follow_topology() {
        let standard = client("");
        assert_eq!(standard.topology(), InstanceTopology::Standard);
        assert_eq!(standard.graphql_url(), "https://api.github.com/graphql");
        assert_eq!(
            standard.rest_url("/orgs/octo/repos"),
            "https://api.github.com/orgs/octo/repos"
        );

        let hosted = client("https://github.example.com/api/v3");
        assert_eq!(hosted.graphql_url(), "https://github.example.com/api/graphql");
        assert_eq!(
            hosted.web_url("octo/hello"),
            "https://github.example.com/octo/hello"
        );
        assert_eq!(hosted.strategy(), AuthStrategy::PersonalAccessToken);
    }

    #[test]
    fn test_rest_url_passes_absolute_through() {
        let client = client("");
        assert_eq!(
            client.rest_url("https://api.github.com/orgs/o/repos?page=2"),
            "https://api.github.com/orgs/o/repos?page=2"
        );
    }

    #[traced_test]
    #[tokio::test]
    async fn test_failed_call_logged_at_warn() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/repos/octo/missing"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})),
            )
            .mount(&server)
            .await;

        let result = client(&server.uri())
            .get::<Value>("get_repo", "repos/octo/missing", &CancellationToken::new())
            .await;

        assert!(result.is_err());
        logs_assert(|lines: &[&str]| {
            lines
                .iter()
                .find(|line| line.contains("Platform call completed"))
                .filter(|line| line.contains("WARN") && line.contains("not_found"))
                .map(|_| ())
                .ok_or_else(|| "no warn-level event for the failed call".to_string())
        });
    }

    #[traced_test]
    #[tokio::test]
    async fn test_successful_call_logged_at_debug() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"login": "octocat"})))
            .mount(&server)
            .await;

        let user: Value = client(&server.uri())
            .get("get_user", "user", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(user["login"], "octocat");
        logs_assert(|lines: &[&str]| {
            let events: Vec<_> = lines
                .iter()
                .filter(|line| line.contains("Platform call completed"))
                .collect();
            match events.as_slice() {
                [line] if line.contains("DEBUG") => Ok(()),
                other => Err(format!("unexpected call events: {other:?}")),
            }
        });
    }
}
