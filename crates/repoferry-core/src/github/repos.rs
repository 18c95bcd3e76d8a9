// SPDX-License-Identifier: Apache-2.0

//! Discovery operations.
//!
//! High-volume read traffic: organization repository listings, app
//! installations, and quota inspection.

use chrono::DateTime;
use octocrab::models::{Installation, Repository};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::client::GitHubClient;
use super::encode_segment;
use super::ratelimit::RateLimitSnapshot;
use crate::retry::RetryError;

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    rate: RateLimitWindow,
}

#[derive(Debug, Deserialize)]
struct RateLimitWindow {
    limit: i64,
    remaining: i64,
    reset: i64,
}

impl GitHubClient {
    /// Lists every repository of an organization.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError`] if any page cannot be fetched.
    #[instrument(skip(self, cancel))]
    pub async fn list_org_repositories(
        &self,
        org: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Repository>, RetryError> {
        let path = format!("orgs/{}/repos?type=all&per_page=100", encode_segment(org));
        let repos: Vec<Repository> = self
            .get_all_pages("list_org_repositories", &path, cancel)
            .await?;
        debug!(count = repos.len(), "Listed organization repositories");
        Ok(repos)
    }

    /// Lists installations of the authenticated app.
    ///
    /// Only an app JWT may call this; installation tokens are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError`] if any page cannot be fetched.
    #[instrument(skip(self, cancel))]
    pub async fn list_app_installations(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Installation>, RetryError> {
        self.get_all_pages("list_app_installations", "app/installations?per_page=100", cancel)
            .await
    }

    /// Fetches the primary quota and seeds the rate limiter with it.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError`] if the quota cannot be fetched.
    #[instrument(skip(self, cancel))]
    pub async fn fetch_rate_limit(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RateLimitSnapshot, RetryError> {
        let response: RateLimitResponse = self.get("fetch_rate_limit", "rate_limit", cancel).await?;

        let snapshot = RateLimitSnapshot {
            remaining: clamp(response.rate.remaining),
            limit: clamp(response.rate.limit),
            reset_at: DateTime::from_timestamp(response.rate.reset, 0),
        };
        self.limiter()
            .update_limits(snapshot.remaining, snapshot.limit, snapshot.reset_at);

        debug!(
            remaining = snapshot.remaining,
            limit = snapshot.limit,
            "Rate limit status"
        );
        Ok(snapshot)
    }
}

fn clamp(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}
