// SPDX-License-Identifier: Apache-2.0

//! GitHub platform integration.
//!
//! Provides credential resolution, the authenticated REST/GraphQL client,
//! instance topology detection, and the discovery and migration-control
//! operations built on top of them.

use anyhow::Result;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

pub mod auth;
pub mod client;
pub mod graphql;
pub mod migrations;
pub mod ratelimit;
pub mod repos;
pub mod router;
pub mod topology;

/// REST API root of the public cloud.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// GraphQL endpoint of the public cloud.
pub const DEFAULT_GRAPHQL_URL: &str = "https://api.github.com/graphql";

/// Browser root of the public cloud.
pub const DEFAULT_WEB_URL: &str = "https://github.com";

/// REST API version pinned on every request.
pub const API_VERSION: &str = "2022-11-28";

/// Characters escaped in a single URL path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

/// Percent-encodes one path segment (an owner, repository, or org name).
#[must_use]
pub fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

/// Parses an owner/repo string to extract owner and repo.
///
/// Validates format: exactly one `/`, non-empty parts.
///
/// # Errors
///
/// Returns an error if the format is invalid.
pub fn parse_owner_repo(s: &str) -> Result<(String, String)> {
    let parts: Vec<&str> = s.split('/').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        anyhow::bail!(
            "Invalid owner/repo format.\n\
             Expected: owner/repo\n\
             Got: {s}"
        );
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}
