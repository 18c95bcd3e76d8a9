// SPDX-License-Identifier: Apache-2.0

//! Organization repository discovery.

use anyhow::{Context, Result};
use repoferry_core::{AppConfig, OperationClass, Side};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::types::{DiscoverResult, DiscoveredRepository};

/// Lists the repositories of `org` through the discovery client of `side`.
///
/// # Errors
///
/// Returns an error if no usable credential is configured or the listing fails.
pub async fn run(
    config: &AppConfig,
    org: &str,
    side: Side,
    cancel: &CancellationToken,
) -> Result<DiscoverResult> {
    let router =
        super::router(config, side).with_context(|| format!("Failed to set up {side} clients"))?;
    let client = router.for_operation(OperationClass::Discovery)?;

    let repos = client
        .list_org_repositories(org, cancel)
        .await
        .with_context(|| format!("Failed to list repositories of {org}"))?;
    info!(org, count = repos.len(), "Discovered repositories");

    let base_url = &config.platform(side).base_url;
    let repositories = repos
        .iter()
        .map(|repo| DiscoveredRepository::from_model(repo, org, base_url))
        .collect();

    Ok(DiscoverResult {
        org: org.to_string(),
        side,
        strategy: client.strategy(),
        repositories,
    })
}
