// SPDX-License-Identifier: Apache-2.0

//! CLI-specific error formatting with user-friendly hints.
//!
//! Walks the `anyhow::Error` chain for the core's structured errors and adds
//! a hint suited to the failure. The library reports what went wrong; this
//! module tells the operator what to do about it.

use std::fmt::Write;

use anyhow::Error;
use repoferry_core::{ConfigError, CredentialError, ErrorKind, RetryError, config_file_path};

/// Formats an error for CLI display with helpful hints.
///
/// The full context chain is always shown. A `Tip:` paragraph is appended
/// when the chain contains a core error that has one.
pub fn format_error(error: &Error) -> String {
    let mut msg = format!("{error:#}");
    if let Some(hint) = hint(error) {
        let _ = write!(msg, "\n\nTip: {hint}");
    }
    msg
}

fn hint(error: &Error) -> Option<String> {
    for cause in error.chain() {
        if let Some(err) = cause.downcast_ref::<RetryError>() {
            return retry_hint(err);
        }
        if let Some(err) = cause.downcast_ref::<CredentialError>() {
            return Some(credential_hint(err));
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return Some(format!(
                "Check your config file at {}",
                config_file_path().display()
            ));
        }
    }
    None
}

fn retry_hint(error: &RetryError) -> Option<String> {
    if error.is_cancelled() {
        return None;
    }
    let hint = match error.kind()? {
        ErrorKind::Unauthorized => {
            "The instance rejected the credential. Check that the token or app key is current."
        }
        ErrorKind::Forbidden => "The credential lacks a required scope or permission.",
        ErrorKind::NotFound => {
            "Check the name, and that the credential can see it (private resources answer 404)."
        }
        ErrorKind::RateLimitExceeded
        | ErrorKind::SecondaryRateLimitExceeded
        | ErrorKind::RateLimitBlocked => {
            "Run `repoferry rate-limit` to see when the quota resets."
        }
        ErrorKind::ServerError | ErrorKind::StreamError => {
            "The instance may be degraded. Try again in a moment."
        }
        ErrorKind::BadRequest | ErrorKind::Unclassified => return None,
    };
    Some(hint.to_string())
}

fn credential_hint(error: &CredentialError) -> String {
    let path = config_file_path();
    match error {
        CredentialError::Missing => format!(
            "Set `token` (or `app_id` and `app_private_key`) under [source] or [destination] in {}, \
             or export REPOFERRY_SOURCE__TOKEN.",
            path.display()
        ),
        CredentialError::PersonalTokenRequired => format!(
            "Migration control only works with a personal access token. Set `token` in {}.",
            path.display()
        ),
        CredentialError::AppCredentialsRequired => format!(
            "Set `app_id` and `app_private_key` in {}.",
            path.display()
        ),
        CredentialError::KeyFile { .. } | CredentialError::InvalidKey(_) => {
            "`app_private_key` must be an RSA PEM key or the path to one.".to_string()
        }
        CredentialError::Signing(_)
        | CredentialError::TokenExchange { .. }
        | CredentialError::Transport(_) => {
            "Check that the app id and installation id belong to this instance.".to_string()
        }
    }
}
