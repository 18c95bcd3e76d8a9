// SPDX-License-Identifier: Apache-2.0

//! Result types returned by command handlers and rendered by [`crate::output`].

use chrono::{DateTime, Utc};
use octocrab::models::{Installation, Repository};
use repoferry_core::github::topology;
use repoferry_core::{AuthStrategy, InstanceTopology, RateLimitSnapshot, Side};
use serde::Serialize;

/// Resolved endpoints of one instance.
#[derive(Serialize)]
pub struct EndpointsResult {
    pub base_url: String,
    pub topology: InstanceTopology,
    pub rest_base: String,
    pub graphql_endpoint: String,
    pub web_root: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_url: Option<String>,
}

/// Quota of every client that was checked.
#[derive(Serialize)]
pub struct RateLimitResult {
    pub entries: Vec<RateLimitEntry>,
}

/// Quota of one client.
#[derive(Serialize)]
pub struct RateLimitEntry {
    pub side: Side,
    pub strategy: AuthStrategy,
    pub remaining: u32,
    pub limit: u32,
    pub reset_at: Option<DateTime<Utc>>,
    pub low: bool,
}

impl RateLimitEntry {
    pub fn new(side: Side, strategy: AuthStrategy, snapshot: &RateLimitSnapshot) -> Self {
        Self {
            side,
            strategy,
            remaining: snapshot.remaining,
            limit: snapshot.limit,
            reset_at: snapshot.reset_at,
            low: snapshot.is_low(),
        }
    }
}

/// Repositories of one organization.
#[derive(Serialize)]
pub struct DiscoverResult {
    pub org: String,
    pub side: Side,
    pub strategy: AuthStrategy,
    pub repositories: Vec<DiscoveredRepository>,
}

/// Migration-relevant facts about one repository.
#[derive(Serialize)]
pub struct DiscoveredRepository {
    pub full_name: String,
    pub private: bool,
    pub archived: bool,
    pub size_kb: u32,
    pub default_branch: Option<String>,
    pub web_url: String,
}

impl DiscoveredRepository {
    /// Summarizes a repository, deriving its browser URL from the instance base URL.
    pub fn from_model(repo: &Repository, org: &str, base_url: &str) -> Self {
        let full_name = repo
            .full_name
            .clone()
            .unwrap_or_else(|| format!("{org}/{}", repo.name));
        let web_url = topology::web_url(base_url, &full_name);

        Self {
            full_name,
            private: repo.private.unwrap_or(false),
            archived: repo.archived.unwrap_or(false),
            size_kb: repo.size.unwrap_or(0),
            default_branch: repo.default_branch.clone(),
            web_url,
        }
    }
}

/// Installations of the configured app.
#[derive(Serialize)]
pub struct InstallationsResult {
    pub side: Side,
    pub installations: Vec<InstallationSummary>,
}

/// One app installation.
#[derive(Serialize)]
pub struct InstallationSummary {
    pub id: u64,
    pub account: String,
    pub target_type: Option<String>,
    pub repository_selection: Option<String>,
}

impl From<&Installation> for InstallationSummary {
    fn from(installation: &Installation) -> Self {
        Self {
            id: installation.id.0,
            account: installation.account.login.clone(),
            target_type: installation.target_type.clone(),
            repository_selection: installation.repository_selection.clone(),
        }
    }
}
