// SPDX-License-Identifier: Apache-2.0

//! Logging initialization for the Repoferry CLI.
//!
//! Uses `tracing` with `tracing-subscriber` for structured logging to stderr,
//! keeping stdout free for command output.
//!
//! # Examples
//!
//! ```bash
//! # Default: warnings from repoferry, errors from the HTTP stack
//! repoferry rate-limit
//!
//! # Retry, wait and quota detail
//! repoferry --verbose discover octo-org
//!
//! # Full control
//! RUST_LOG=repoferry_core=trace repoferry rate-limit
//! ```

use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Initialize the logging subsystem.
///
/// `RUST_LOG` wins when set. Otherwise `verbose` raises the default filter
/// from warn to debug for Repoferry targets.
pub fn init_logging(verbose: bool) {
    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let default_filter = if verbose {
        "repoferry=debug,reqwest=error"
    } else {
        "repoferry=warn,reqwest=error"
    };
    let filter_layer = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
