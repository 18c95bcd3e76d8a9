// SPDX-License-Identifier: Apache-2.0

//! Quota inspection across every configured credential.

use anyhow::{Context, Result};
use repoferry_core::{AppConfig, ClientError, CredentialError, Side};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::types::{RateLimitEntry, RateLimitResult};

/// Fetches the quota of every client on `side`, or on both sides if `None`.
///
/// When checking both sides, a side without credentials is skipped.
///
/// # Errors
///
/// Returns an error if no side has credentials, a client cannot be built,
/// or a quota request fails.
pub async fn run(
    config: &AppConfig,
    side: Option<Side>,
    cancel: &CancellationToken,
) -> Result<RateLimitResult> {
    let sides = side.map_or_else(|| Side::BOTH.to_vec(), |side| vec![side]);
    let mut entries = Vec::new();

    for current in sides {
        let router = match super::router(config, current) {
            Ok(router) => router,
            Err(ClientError::Credential(CredentialError::Missing)) if side.is_none() => {
                debug!(side = %current, "No credentials configured, skipping");
                continue;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to set up {current} clients"));
            }
        };

        for (strategy, client) in router.clients() {
            let snapshot = client
                .fetch_rate_limit(cancel)
                .await
                .with_context(|| format!("Failed to fetch {current} quota ({strategy})"))?;
            entries.push(RateLimitEntry::new(current, strategy, &snapshot));
        }
    }

    if entries.is_empty() {
        return Err(CredentialError::Missing.into());
    }

    Ok(RateLimitResult { entries })
}
