// SPDX-License-Identifier: Apache-2.0

//! Error types shared across Repoferry modules.
//!
//! Uses `thiserror` for deriving `std::error::Error` implementations.
//! Platform call failures are classified separately in [`crate::classify`];
//! the types here cover cancellation and configuration.

use thiserror::Error;

/// A blocking wait was interrupted by its cancellation token.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration source could not be read or deserialized.
    #[error("Configuration error: {0}")]
    Load(#[from] config::ConfigError),

    /// Configuration parsed but holds an unusable value.
    #[error("Invalid configuration: {message}")]
    Invalid {
        /// What is wrong with the value.
        message: String,
    },
}
