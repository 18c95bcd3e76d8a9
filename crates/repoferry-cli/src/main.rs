// SPDX-License-Identifier: Apache-2.0

//! Repoferry - inspect and exercise GitHub instances ahead of a migration.
//!
//! A thin operator CLI over `repoferry-core`: endpoint resolution, quota
//! inspection, organization discovery, and app installation listing.

mod cli;
mod commands;
mod errors;
mod logging;
mod output;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cli::{Cli, OutputContext};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let output_ctx = OutputContext::from_cli(cli.output, cli.verbose);

    // Ctrl-C cancels in-flight retries and waits instead of killing mid-request
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("Interrupt received, cancelling");
                cancel.cancel();
            }
        }
    });

    match commands::run(cli.command, output_ctx, cli.config.as_deref(), &cancel).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let formatted = errors::format_error(&e);
            eprintln!("Error: {formatted}");
            Err(e)
        }
    }
}
