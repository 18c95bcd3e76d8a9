// SPDX-License-Identifier: Apache-2.0

//! App installation listing.

use anyhow::{Context, Result};
use repoferry_core::{AppConfig, OperationClass, Side};
use tokio_util::sync::CancellationToken;

use super::types::{InstallationSummary, InstallationsResult};

/// Lists installations of the app configured for `side`.
///
/// # Errors
///
/// Returns an error if app credentials are missing or the listing fails.
pub async fn run(
    config: &AppConfig,
    side: Side,
    cancel: &CancellationToken,
) -> Result<InstallationsResult> {
    let router =
        super::router(config, side).with_context(|| format!("Failed to set up {side} clients"))?;
    let client = router.for_operation(OperationClass::AppInstallations)?;

    let installations = client
        .list_app_installations(cancel)
        .await
        .context("Failed to list app installations")?;

    Ok(InstallationsResult {
        side,
        installations: installations.iter().map(InstallationSummary::from).collect(),
    })
}
