// SPDX-License-Identifier: Apache-2.0

//! Command-line interface definition for Repoferry.
//!
//! Uses clap's derive API for declarative CLI parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use repoferry_core::Side;

/// Output format for CLI results.
#[derive(Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text with colors (default)
    #[default]
    Text,
    /// JSON output for programmatic consumption
    Json,
}

/// Which configured instance a command talks to.
#[derive(Clone, Copy, ValueEnum)]
pub enum SideArg {
    /// The instance repositories are migrated from
    Source,
    /// The instance repositories are migrated to
    Destination,
}

impl From<SideArg> for Side {
    fn from(side: SideArg) -> Self {
        match side {
            SideArg::Source => Side::Source,
            SideArg::Destination => Side::Destination,
        }
    }
}

/// Global output configuration passed to commands.
#[derive(Clone)]
pub struct OutputContext {
    /// Output format (text, json)
    pub format: OutputFormat,
    /// Show extra detail in text output
    pub verbose: bool,
}

impl OutputContext {
    /// Creates an `OutputContext` from CLI arguments.
    pub fn from_cli(format: OutputFormat, verbose: bool) -> Self {
        Self { format, verbose }
    }
}

/// Repoferry - inspect and exercise GitHub instances ahead of a migration.
///
/// Resolves instance endpoints, reports API quotas per credential, and lists
/// what the configured credentials can see.
#[derive(Parser)]
#[command(name = "repoferry")]
#[command(version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Output format (text, json)
    #[arg(long, short = 'o', global = true, default_value = "text", value_enum)]
    pub output: OutputFormat,

    /// Enable verbose output (debug-level logging)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Configuration file to use instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Resolve the API and web endpoints of an instance (offline)
    Endpoints {
        /// Instance base URL; empty means github.com
        base_url: String,

        /// Also print the browser URL of this repository (owner/repo)
        #[arg(long)]
        repo: Option<String>,
    },

    /// Show the remaining API quota of every configured credential
    RateLimit {
        /// Only check one side (default: both)
        #[arg(long, value_enum)]
        side: Option<SideArg>,
    },

    /// List the repositories of an organization
    Discover {
        /// Organization login
        org: String,

        /// Instance to query
        #[arg(long, value_enum, default_value = "source")]
        side: SideArg,
    },

    /// List the installations of the configured app
    Installations {
        /// Instance to query
        #[arg(long, value_enum, default_value = "source")]
        side: SideArg,
    },
}
