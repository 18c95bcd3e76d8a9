// SPDX-License-Identifier: Apache-2.0

//! Offline endpoint resolution.

use anyhow::Result;
use repoferry_core::InstanceTopology;
use repoferry_core::github::{parse_owner_repo, topology};

use super::types::EndpointsResult;

/// Resolves every endpoint of `base_url`, plus the browser URL of `repo` if given.
///
/// # Errors
///
/// Returns an error if `repo` is not in `owner/repo` form.
pub fn run(base_url: &str, repo: Option<&str>) -> Result<EndpointsResult> {
    let web_url = repo
        .map(|repo| {
            let (owner, name) = parse_owner_repo(repo)?;
            Ok::<_, anyhow::Error>(topology::web_url(base_url, &format!("{owner}/{name}")))
        })
        .transpose()?;

    Ok(EndpointsResult {
        base_url: base_url.to_string(),
        topology: InstanceTopology::detect(base_url),
        rest_base: topology::rest_base(base_url),
        graphql_endpoint: topology::graphql_endpoint(base_url),
        web_root: topology::web_root(base_url),
        web_url,
    })
}
