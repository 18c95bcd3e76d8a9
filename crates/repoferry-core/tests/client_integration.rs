// SPDX-License-Identifier: Apache-2.0

//! HTTP-level tests of the authenticated client against a mock server.
//!
//! A mock server URL is a self-hosted topology, so REST paths live under
//! `/api/v3` and GraphQL under `/api/graphql`.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use octocrab::models::{AppId, InstallationId};
use repoferry_core::github::migrations::{MigrationSourceType, RetryAfterFailureError};
use repoferry_core::{
    AuthStrategy, CircuitBreaker, ClientOptions, Credential, ErrorKind, GitHubClient,
    MigrationClient, RateLimiterOptions, RemoteMigrationState, RepositoryMigrationPhase,
    RetryError, RetryPolicy, StartMigration,
};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const APP_KEY: &str = include_str!("fixtures/app-key.pem");
const APP_PUBLIC_KEY: &str = include_str!("fixtures/app-key.pub.pem");

fn fast_retry(max_attempts: usize) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(20),
        secondary_rate_limit_wait: Duration::from_millis(10),
        ..RetryPolicy::default()
    }
}

fn options(server: &MockServer, max_attempts: usize) -> ClientOptions {
    ClientOptions::builder()
        .base_url(server.uri())
        .retry(fast_retry(max_attempts))
        .rate_limit(RateLimiterOptions {
            min_interval: Duration::from_millis(1),
            ..RateLimiterOptions::default()
        })
        .build()
}

fn pat_client(server: &MockServer, max_attempts: usize) -> GitHubClient {
    GitHubClient::new(
        options(server, max_attempts),
        Credential::PersonalAccessToken(SecretString::from("ghp_test")),
    )
    .unwrap()
}

#[tokio::test]
async fn test_quota_headers_update_limiter() {
    let server = MockServer::start().await;
    let reset = Utc::now().timestamp() + 3600;
    Mock::given(method("GET"))
        .and(path("/api/v3/user"))
        .and(header("authorization", "token ghp_test"))
        .and(header("x-github-api-version", "2022-11-28"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ratelimit-remaining", "4321")
                .insert_header("x-ratelimit-limit", "5000")
                .insert_header("x-ratelimit-reset", reset.to_string().as_str())
                .set_body_json(json!({"login": "octocat"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = pat_client(&server, 3);
    let user: Value = client
        .get("get_user", "user", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(user["login"], "octocat");
    let status = client.rate_limit_status();
    assert_eq!(status.remaining, 4321);
    assert_eq!(status.limit, 5000);
    assert_eq!(status.reset_at.map(|at| at.timestamp()), Some(reset));
}

#[tokio::test]
async fn test_exhausted_quota_is_rate_limit_exceeded() {
    let server = MockServer::start().await;
    let reset = Utc::now().timestamp() + 3600;
    Mock::given(method("GET"))
        .and(path("/api/v3/orgs/octo"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-ratelimit-limit", "5000")
                .insert_header("x-ratelimit-reset", reset.to_string().as_str())
                .set_body_json(json!({"message": "API rate limit exceeded for user ID 1."})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = pat_client(&server, 1);
    let err = client
        .get::<Value>("get_org", "orgs/octo", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, RetryError::Exhausted { attempts: 1, .. }));
    assert_eq!(err.kind(), Some(ErrorKind::RateLimitExceeded));
    // Failed responses still carry authoritative quota.
    assert_eq!(client.rate_limit_status().remaining, 0);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/repos/octo/missing"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = pat_client(&server, 3)
        .get::<Value>("get_repo", "repos/octo/missing", &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        RetryError::Terminal { operation, error } => {
            assert_eq!(operation, "get_repo");
            assert_eq!(error.kind(), ErrorKind::NotFound);
            assert_eq!(error.status(), Some(404));
        }
        other => panic!("expected terminal error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_bad_gateway_html_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/user"))
        .respond_with(
            ResponseTemplate::new(502)
                .set_body_string("<html><body><h1>502 Bad Gateway</h1></body></html>"),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"login": "octocat"})))
        .expect(1)
        .mount(&server)
        .await;

    let user: Value = pat_client(&server, 3)
        .get("get_user", "user", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(user["login"], "octocat");
}

#[tokio::test]
async fn test_secondary_rate_limit_waits_and_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/user"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "message": "You have exceeded a secondary rate limit. Please wait a few minutes before you try again."
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"login": "octocat"})))
        .expect(1)
        .mount(&server)
        .await;

    let result: Result<Value, _> = pat_client(&server, 3)
        .get("get_user", "user", &CancellationToken::new())
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_persistent_server_error_exhausts_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/user"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .expect(3)
        .mount(&server)
        .await;

    let err = pat_client(&server, 3)
        .get::<Value>("get_user", "user", &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        RetryError::Exhausted {
            operation,
            attempts,
            last,
        } => {
            assert_eq!(operation, "get_user");
            assert_eq!(attempts, 3);
            assert_eq!(last.kind(), ErrorKind::ServerError);
        }
        other => panic!("expected exhausted error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cancelled_before_call_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let client = pat_client(&server, 3);
    let before = client.rate_limit_status();
    let err = client
        .get::<Value>("get_user", "user", &cancel)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(client.rate_limit_status(), before);
}

#[tokio::test]
async fn test_rest_pagination_follows_link_header() {
    let server = MockServer::start().await;
    let next = format!("{}/api/v3/orgs/octo/repos?per_page=100&page=2", server.uri());

    Mock::given(method("GET"))
        .and(path("/api/v3/orgs/octo/repos"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"name": "three"}])))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/orgs/octo/repos"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("link", format!(r#"<{next}>; rel="next""#).as_str())
                .set_body_json(json!([{"name": "one"}, {"name": "two"}])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let repos: Vec<Value> = pat_client(&server, 3)
        .get_all_pages("list_repos", "orgs/octo/repos?per_page=100", &CancellationToken::new())
        .await
        .unwrap();

    let names: Vec<&str> = repos.iter().filter_map(|r| r["name"].as_str()).collect();
    assert_eq!(names, ["one", "two", "three"]);
}

#[tokio::test]
async fn test_graphql_typed_error_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/graphql"))
        .and(body_partial_json(json!({"variables": {"login": "ghost-org"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"organization": null},
            "errors": [{
                "type": "NOT_FOUND",
                "path": ["organization"],
                "message": "Could not resolve to an Organization with the login of 'ghost-org'."
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = pat_client(&server, 3)
        .query::<Value>(
            "get_owner_id",
            "query($login: String!) { organization(login: $login) { id } }",
            json!({"login": "ghost-org"}),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RetryError::Terminal { .. }));
    assert_eq!(err.kind(), Some(ErrorKind::NotFound));
}

#[tokio::test]
async fn test_graphql_cursor_pagination() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/graphql"))
        .and(body_partial_json(json!({"variables": {"cursor": "Y3Vyc29yOjI="}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"organization": {"repositories": {
                "nodes": [{"name": "c"}],
                "pageInfo": {"hasNextPage": false, "endCursor": "Y3Vyc29yOjM="}
            }}}
        })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"organization": {"repositories": {
                "nodes": [{"name": "a"}, {"name": "b"}],
                "pageInfo": {"hasNextPage": true, "endCursor": "Y3Vyc29yOjI="}
            }}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let names: Vec<Value> = pat_client(&server, 3)
        .query_all_pages(
            "list_repo_names",
            "query($login: String!, $cursor: String) { organization(login: $login) { repositories(first: 100, after: $cursor) { nodes { name } pageInfo { hasNextPage endCursor } } } }",
            json!({"login": "octo"}),
            &CancellationToken::new(),
            |data: Value| {
                serde_json::from_value(data["organization"]["repositories"].clone()).ok()
            },
        )
        .await
        .unwrap();

    assert_eq!(names, [json!({"name": "a"}), json!({"name": "b"}), json!({"name": "c"})]);
}

#[tokio::test]
async fn test_installation_token_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v3/app/installations/7/access_tokens"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "token": "ghs_installation",
            "expires_at": "2099-01-01T00:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/rate_limit"))
        .and(header("authorization", "Bearer ghs_installation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resources": {},
            "rate": {"limit": 15000, "remaining": 14990, "reset": 4_102_444_800_i64, "used": 10}
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = GitHubClient::new(
        options(&server, 3),
        Credential::AppInstallation {
            app_id: AppId(42),
            private_key: SecretString::from(APP_KEY),
            installation_id: InstallationId(7),
        },
    )
    .unwrap();
    assert_eq!(client.strategy(), AuthStrategy::AppInstallation);

    let cancel = CancellationToken::new();
    let snapshot = client.fetch_rate_limit(&cancel).await.unwrap();
    assert_eq!(snapshot.limit, 15000);
    assert_eq!(snapshot.remaining, 14990);
    // The cached token is reused; only one exchange happens.
    client.fetch_rate_limit(&cancel).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let exchange = requests
        .iter()
        .find(|request| request.url.path().ends_with("/access_tokens"))
        .unwrap();
    let bearer = exchange
        .headers
        .get("authorization")
        .unwrap()
        .to_str()
        .unwrap();
    let jwt = bearer.strip_prefix("Bearer ").unwrap();

    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_issuer(&["42"]);
    let claims = jsonwebtoken::decode::<Value>(
        jwt,
        &DecodingKey::from_rsa_pem(APP_PUBLIC_KEY.as_bytes()).unwrap(),
        &validation,
    )
    .unwrap()
    .claims;
    let lifetime = claims["exp"].as_i64().unwrap() - claims["iat"].as_i64().unwrap();
    assert_eq!(lifetime, 10 * 60);
}

#[tokio::test]
async fn test_rejected_token_exchange_is_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v3/app/installations/7/access_tokens"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"message": "A JSON web token could not be decoded"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = GitHubClient::new(
        options(&server, 3),
        Credential::AppInstallation {
            app_id: AppId(42),
            private_key: SecretString::from(APP_KEY),
            installation_id: InstallationId(7),
        },
    )
    .unwrap();

    let err = client
        .fetch_rate_limit(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RetryError::Terminal { .. }));
    assert_eq!(err.kind(), Some(ErrorKind::Unauthorized));
}

#[tokio::test]
async fn test_breaker_opens_after_exhausted_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/user"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let client = &pat_client(&server, 2);
    let breaker = &CircuitBreaker::new(1, Duration::from_secs(60));
    let cancel = &CancellationToken::new();
    let url = client.rest_url("user");
    let url = url.as_str();

    let call = move || {
        client.run_guarded(breaker, "get_user", cancel, move || async move {
            client
                .send("get_user", reqwest::Method::GET, url, None)
                .await
                .map(|_| ())
        })
    };

    let first = call().await.unwrap_err();
    assert!(!first.is_open());

    // Rejected without reaching the server.
    let second = call().await.unwrap_err();
    assert!(second.is_open());
}

#[tokio::test]
async fn test_refused_connection_is_stream_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = GitHubClient::new(
        ClientOptions::builder()
            .base_url(format!("http://{addr}"))
            .retry(fast_retry(1))
            .build(),
        Credential::PersonalAccessToken(SecretString::from("ghp_test")),
    )
    .unwrap();
    let err = client
        .get::<Value>("get_user", "user", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, RetryError::Exhausted { attempts: 1, .. }));
    assert_eq!(err.kind(), Some(ErrorKind::StreamError));
}

fn migration_client(server: &MockServer, max_attempts: usize) -> MigrationClient {
    MigrationClient::new(pat_client(server, max_attempts)).unwrap()
}

async fn mount_unlock(server: &MockServer, status: u16, expected: u64) {
    Mock::given(method("DELETE"))
        .and(path("/api/v3/orgs/octo/migrations/42/repos/hello/lock"))
        .and(header("authorization", "token ghp_test"))
        .respond_with(ResponseTemplate::new(status))
        .expect(expected)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_retry_after_failure_unlocks_source() {
    let server = MockServer::start().await;
    mount_unlock(&server, 204, 1).await;

    let next = migration_client(&server, 3)
        .retry_after_failure(
            "octo",
            42,
            "hello",
            RepositoryMigrationPhase::MigrationFailed,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(next, RepositoryMigrationPhase::PreMigration);
}

#[tokio::test]
async fn test_retry_after_failure_tolerates_missing_lock() {
    let server = MockServer::start().await;
    mount_unlock(&server, 404, 1).await;

    let next = migration_client(&server, 3)
        .retry_after_failure(
            "octo",
            42,
            "hello",
            RepositoryMigrationPhase::MigrationFailed,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(next, RepositoryMigrationPhase::PreMigration);
}

#[tokio::test]
async fn test_retry_after_failure_reports_unlock_failure() {
    let server = MockServer::start().await;
    mount_unlock(&server, 500, 1).await;

    let err = migration_client(&server, 1)
        .retry_after_failure(
            "octo",
            42,
            "hello",
            RepositoryMigrationPhase::MigrationFailed,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    match err {
        RetryAfterFailureError::Unlock(inner) => {
            assert_eq!(inner.kind(), Some(ErrorKind::ServerError));
        }
        other => panic!("expected unlock failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_retry_after_failure_rejects_other_phases() {
    let server = MockServer::start().await;
    mount_unlock(&server, 204, 0).await;

    let client = migration_client(&server, 3);
    for phase in [
        RepositoryMigrationPhase::Pending,
        RepositoryMigrationPhase::DryRunComplete,
        RepositoryMigrationPhase::MigratingContent,
    ] {
        let err = client
            .retry_after_failure("octo", 42, "hello", phase, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            RetryAfterFailureError::Phase(transition) => {
                assert_eq!(transition.from, phase);
                assert_eq!(transition.to, RepositoryMigrationPhase::PreMigration);
            }
            other => panic!("expected phase error, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_migration_setup_mutations() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/graphql"))
        .and(body_partial_json(json!({"variables": {"login": "octo-dest"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"organization": {"id": "O_kgDOA", "login": "octo-dest"}}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/graphql"))
        .and(body_partial_json(json!({
            "variables": {"ownerId": "O_kgDOA", "type": "GITHUB_ARCHIVE"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"createMigrationSource": {"migrationSource": {
                "id": "MS_kgDOB",
                "name": "ferry",
                "url": "https://ghe.example.com",
                "type": "GITHUB_ARCHIVE"
            }}}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/graphql"))
        .and(body_partial_json(json!({
            "variables": {
                "sourceId": "MS_kgDOB",
                "ownerId": "O_kgDOA",
                "sourceRepositoryUrl": "https://ghe.example.com/octo/hello",
                "repositoryName": "hello",
                "continueOnError": false,
                "accessToken": "ghp_source",
                "targetRepoVisibility": "private"
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"startRepositoryMigration": {"repositoryMigration": {
                "id": "RM_kgDOC",
                "sourceUrl": "https://ghe.example.com/octo/hello",
                "state": "QUEUED",
                "repositoryName": "hello"
            }}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = migration_client(&server, 3);
    let cancel = CancellationToken::new();
    let owner_id = client.get_owner_id("octo-dest", &cancel).await.unwrap();
    assert_eq!(owner_id, "O_kgDOA");

    let source = client
        .create_migration_source(&owner_id, "ferry", "https://ghe.example.com", &cancel)
        .await
        .unwrap();
    assert_eq!(source.id, "MS_kgDOB");
    assert_eq!(source.source_type, MigrationSourceType::GithubArchive);

    let input = StartMigration::builder()
        .source_id(source.id)
        .owner_id(owner_id)
        .source_repository_url("https://ghe.example.com/octo/hello")
        .repository_name("hello")
        .access_token("ghp_source")
        .target_repo_visibility("private")
        .build();
    let migration = client
        .start_repository_migration(&input, &cancel)
        .await
        .unwrap();
    assert_eq!(migration.id, "RM_kgDOC");
    assert_eq!(migration.state, RemoteMigrationState::Queued);
    assert_eq!(
        migration.state.phase(),
        Some(RepositoryMigrationPhase::QueuedForMigration)
    );
}

#[tokio::test]
async fn test_unknown_owner_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/graphql"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": {"organization": null}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = migration_client(&server, 3)
        .get_owner_id("ghost-org", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, RetryError::Terminal { .. }));
    assert_eq!(err.kind(), Some(ErrorKind::NotFound));
}

#[tokio::test]
async fn test_unrecognized_remote_state_has_no_phase() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/graphql"))
        .and(body_partial_json(json!({"variables": {"id": "RM_kgDOC"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"node": {
                "id": "RM_kgDOC",
                "sourceUrl": "https://ghe.example.com/octo/hello",
                "state": "AWAITING_REVIEW",
                "repositoryName": "hello",
                "failureReason": null,
                "warningsCount": 0,
                "migrationLogUrl": null
            }}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let migration = migration_client(&server, 3)
        .get_repository_migration("RM_kgDOC", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(migration.state, RemoteMigrationState::Unknown);
    assert_eq!(migration.state.phase(), None);
    assert_eq!(migration.repository_name.as_deref(), Some("hello"));
}
