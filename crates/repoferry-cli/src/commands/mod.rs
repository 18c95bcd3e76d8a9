// SPDX-License-Identifier: Apache-2.0

//! Command handlers for Repoferry CLI.

pub mod discover;
pub mod endpoints;
pub mod installations;
pub mod rate_limit;
pub mod types;

use std::path::Path;

use anyhow::{Context, Result};
use repoferry_core::{AppConfig, ClientError, ClientRouter, Side, load_config, load_config_from};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cli::{Commands, OutputContext};
use crate::output;

/// Dispatch to the appropriate command handler.
///
/// Configuration is only loaded for commands that talk to an instance.
pub async fn run(
    command: Commands,
    ctx: OutputContext,
    config_path: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<()> {
    match command {
        Commands::Endpoints { base_url, repo } => {
            let result = endpoints::run(&base_url, repo.as_deref())?;
            output::render(&result, &ctx)
        }

        Commands::RateLimit { side } => {
            let config = load(config_path)?;
            let result = rate_limit::run(&config, side.map(Side::from), cancel).await?;
            output::render(&result, &ctx)
        }

        Commands::Discover { org, side } => {
            let config = load(config_path)?;
            let result = discover::run(&config, &org, side.into(), cancel).await?;
            output::render(&result, &ctx)
        }

        Commands::Installations { side } => {
            let config = load(config_path)?;
            let result = installations::run(&config, side.into(), cancel).await?;
            output::render(&result, &ctx)
        }
    }
}

fn load(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => {
            anyhow::ensure!(
                path.exists(),
                "Configuration file not found: {}",
                path.display()
            );
            load_config_from(path)
        }
        None => load_config(),
    }
    .context("Failed to load configuration")?;

    debug!("Configuration loaded successfully");
    Ok(config)
}

/// Builds the clients of one side.
fn router(config: &AppConfig, side: Side) -> Result<ClientRouter, ClientError> {
    ClientRouter::new(
        config.platform(side),
        config.retry.policy(),
        config.rate_limit.options(),
    )
}
