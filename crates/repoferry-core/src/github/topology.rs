// SPDX-License-Identifier: Apache-2.0

//! Platform instance topology.
//!
//! A base URL refers to one of three hosting modes. The topology and every
//! endpoint derived from it are recomputed from the URL string on demand.

use serde::Serialize;

use super::{DEFAULT_API_URL, DEFAULT_GRAPHQL_URL, DEFAULT_WEB_URL};

/// Host marker of cloud instances with data residency.
pub const DATA_RESIDENCY_MARKER: &str = ".ghe.com";

/// Hosting mode of a platform instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceTopology {
    /// The public cloud at the default URL.
    Standard,
    /// Cloud with data residency on a dedicated subdomain.
    CloudDataResidency,
    /// A self-hosted server.
    SelfHosted,
}

impl InstanceTopology {
    /// Classifies a base URL.
    ///
    /// Empty or default URLs are [`Standard`](Self::Standard), URLs on the
    /// residency domain are [`CloudDataResidency`](Self::CloudDataResidency),
    /// and anything else is [`SelfHosted`](Self::SelfHosted).
    #[must_use]
    pub fn detect(base_url: &str) -> Self {
        let trimmed = normalize(base_url);
        if trimmed.is_empty() || trimmed == DEFAULT_API_URL || trimmed == DEFAULT_WEB_URL {
            Self::Standard
        } else if split_url(trimmed).1.contains(DATA_RESIDENCY_MARKER) {
            Self::CloudDataResidency
        } else {
            Self::SelfHosted
        }
    }

    /// Returns the snake_case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::CloudDataResidency => "cloud_data_residency",
            Self::SelfHosted => "self_hosted",
        }
    }
}

impl std::fmt::Display for InstanceTopology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn normalize(base_url: &str) -> &str {
    base_url.trim().trim_end_matches('/')
}

/// Splits a URL into scheme, host, and path (path keeps its leading slash).
fn split_url(url: &str) -> (&str, &str, &str) {
    let (scheme, rest) = url.split_once("://").unwrap_or(("https", url));
    match rest.find('/') {
        Some(idx) => (scheme, &rest[..idx], &rest[idx..]),
        None => (scheme, rest, ""),
    }
}

fn strip_api_suffix(url: &str) -> &str {
    url.strip_suffix("/api/v3")
        .or_else(|| url.strip_suffix("/api"))
        .unwrap_or(url)
}

fn residency_host(host: &str) -> &str {
    host.strip_prefix("api.").unwrap_or(host)
}

/// REST API root for a base URL.
#[must_use]
pub fn rest_base(base_url: &str) -> String {
    let trimmed = normalize(base_url);
    match InstanceTopology::detect(trimmed) {
        InstanceTopology::Standard => DEFAULT_API_URL.to_string(),
        InstanceTopology::CloudDataResidency => {
            let (scheme, host, _) = split_url(trimmed);
            format!("{scheme}://api.{}", residency_host(host))
        }
        InstanceTopology::SelfHosted => format!("{}/api/v3", strip_api_suffix(trimmed)),
    }
}

/// GraphQL endpoint for a base URL.
///
/// A self-hosted URL that already ends in `/api/v3` or `/api` yields exactly
/// one `/api/graphql` suffix.
#[must_use]
pub fn graphql_endpoint(base_url: &str) -> String {
    let trimmed = normalize(base_url);
    match InstanceTopology::detect(trimmed) {
        InstanceTopology::Standard => DEFAULT_GRAPHQL_URL.to_string(),
        InstanceTopology::CloudDataResidency => {
            let (scheme, host, _) = split_url(trimmed);
            format!("{scheme}://api.{}/graphql", residency_host(host))
        }
        InstanceTopology::SelfHosted => format!("{}/api/graphql", strip_api_suffix(trimmed)),
    }
}

/// Browser URL of the instance root.
#[must_use]
pub fn web_root(base_url: &str) -> String {
    let trimmed = normalize(base_url);
    match InstanceTopology::detect(trimmed) {
        InstanceTopology::Standard => DEFAULT_WEB_URL.to_string(),
        InstanceTopology::CloudDataResidency => {
            let (scheme, host, _) = split_url(trimmed);
            format!("{scheme}://{}", residency_host(host))
        }
        InstanceTopology::SelfHosted => strip_api_suffix(trimmed).to_string(),
    }
}

/// Canonical browser URL for an `owner/repo` identifier.
#[must_use]
pub fn web_url(base_url: &str, owner_repo: &str) -> String {
    format!("{}/{}", web_root(base_url), owner_repo.trim_matches('/'))
}
