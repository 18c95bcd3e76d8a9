// SPDX-License-Identifier: Apache-2.0

//! GraphQL payloads and cursor-based pagination.
//!
//! Response `errors` arrays become a [`GraphQlFailure`] that keeps each
//! error's `type`, so classification can map them without parsing text.

use std::fmt;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::client::GitHubClient;
use crate::classify::ErrorKind;
use crate::retry::RetryError;

/// One entry of a GraphQL `errors` array.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlErrorEntry {
    /// Human-readable message.
    pub message: String,
    /// Machine-readable error type, e.g. `NOT_FOUND`.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// A GraphQL response that carried errors.
#[derive(Debug, Clone)]
pub struct GraphQlFailure {
    /// Errors reported by the server.
    pub errors: Vec<GraphQlErrorEntry>,
}

impl GraphQlFailure {
    /// Classification implied by the first recognised error type.
    #[must_use]
    pub fn structured_kind(&self) -> Option<ErrorKind> {
        self.errors
            .iter()
            .find_map(|entry| match entry.kind.as_deref()? {
                "RATE_LIMITED" => Some(ErrorKind::RateLimitExceeded),
                "FORBIDDEN" => Some(ErrorKind::Forbidden),
                "NOT_FOUND" => Some(ErrorKind::NotFound),
                "UNAUTHORIZED" => Some(ErrorKind::Unauthorized),
                _ => None,
            })
    }
}

impl fmt::Display for GraphQlFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<&str> = self.errors.iter().map(|e| e.message.as_str()).collect();
        write!(f, "GraphQL error: {}", messages.join("; "))
    }
}

impl std::error::Error for GraphQlFailure {}

/// GraphQL response envelope.
#[derive(Debug, Deserialize)]
pub struct GraphQlResponse<T> {
    /// Query result.
    pub data: Option<T>,
    /// Errors, if any.
    #[serde(default)]
    pub errors: Vec<GraphQlErrorEntry>,
}

impl<T> GraphQlResponse<T> {
    /// Returns the data, or the errors as a [`GraphQlFailure`].
    ///
    /// # Errors
    ///
    /// Fails if the response carries errors or no data.
    pub fn into_result(self) -> anyhow::Result<T> {
        if !self.errors.is_empty() {
            return Err(GraphQlFailure {
                errors: self.errors,
            }
            .into());
        }
        self.data
            .ok_or_else(|| anyhow::anyhow!("GraphQL response contained no data"))
    }
}

/// Cursor position of a connection page.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    /// Whether another page follows.
    pub has_next_page: bool,
    /// Cursor to request the next page with.
    pub end_cursor: Option<String>,
}

/// One page of a cursor-based connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection<T> {
    /// Items on this page.
    #[serde(default = "Vec::new")]
    pub nodes: Vec<T>,
    /// Cursor position.
    pub page_info: PageInfo,
    /// Total items across all pages, when requested.
    #[serde(default)]
    pub total_count: Option<u64>,
}

impl GitHubClient {
    /// Walks a cursor-based connection to the end.
    ///
    /// The query must declare a `$cursor: String` variable. Each page is a
    /// separately retried call. `extract` picks the connection out of the
    /// page data; returning `None` ends the walk.
    ///
    /// # Errors
    ///
    /// Returns the first page's [`RetryError`].
    pub async fn query_all_pages<D, N, F>(
        &self,
        operation: &str,
        query: &str,
        variables: Value,
        cancel: &CancellationToken,
        extract: F,
    ) -> Result<Vec<N>, RetryError>
    where
        D: DeserializeOwned,
        F: Fn(D) -> Option<Connection<N>>,
    {
        let mut cursor: Option<String> = None;
        let mut nodes = Vec::new();
        let mut pages = 0_usize;

        loop {
            let mut page_vars = variables.clone();
            if let Value::Object(map) = &mut page_vars {
                map.insert("cursor".to_string(), json!(cursor));
            }

            let data: D = self.query(operation, query, page_vars, cancel).await?;
            pages += 1;

            let Some(connection) = extract(data) else {
                break;
            };
            nodes.extend(connection.nodes);

            match connection.page_info {
                PageInfo {
                    has_next_page: true,
                    end_cursor: Some(next),
                } => cursor = Some(next),
                _ => break,
            }
        }

        debug!(operation, pages, items = nodes.len(), "Connection exhausted");
        Ok(nodes)
    }
}
