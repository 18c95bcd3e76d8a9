// SPDX-License-Identifier: Apache-2.0

//! Classification of failed platform calls.
//!
//! Turns raw transport, HTTP, and GraphQL failures into a closed set of
//! typed, retryability-tagged errors. Classification runs in priority order:
//!
//! 1. Structured status codes (HTTP responses, `reqwest`, `octocrab`, GraphQL error types)
//! 2. Status codes embedded in error text (proxies returning HTML bodies)
//! 3. Secondary / abuse rate-limit phrasing
//! 4. Client-side pre-emptive block carrying a `rate reset in <N>s` countdown
//! 5. Transport and multiplexed-stream failures
//! 6. Anything else is unclassified

use std::error::Error as StdError;
use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use crate::github::auth::CredentialError;
use crate::github::client::HttpFailure;
use crate::github::graphql::GraphQlFailure;

/// Status codes embedded in free text, e.g. `502 Bad Gateway` or `status 503`.
static TEXT_STATUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b([1-5]\d{2})\s+(?:bad request|unauthorized|forbidden|not found|too many requests|internal server error|not implemented|bad gateway|service unavailable|gateway time-?out)\b|\b(?:status(?:\s+code)?|http(?:/[\d.]+)?)\s*[:=]?\s*([1-5]\d{2})\b",
    )
    .expect("status pattern is valid")
});

/// Secondary (abuse) rate-limit phrasing and documentation anchors.
static SECONDARY_RATE_LIMIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)secondary rate limit|abuse detection|#secondary-rate-limits|#abuse-rate-limits")
        .expect("secondary rate limit pattern is valid")
});

/// Primary quota exhaustion phrasing.
static PRIMARY_RATE_LIMIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)api rate limit exceeded").expect("primary rate limit pattern is valid")
});

/// Pre-emptive block message with a human-readable countdown.
static BLOCKED_COUNTDOWN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)rate reset in\s+(\d+)\s*(s|m)\b").expect("countdown pattern is valid")
});

/// Lowercase fragments of transport and HTTP/2 stream failures.
const STREAM_FAILURE_FRAGMENTS: &[&str] = &[
    "connection reset",
    "broken pipe",
    "use of closed network connection",
    "connection closed before message completed",
    "connection closed",
    "unexpected eof",
    "stream error",
    "stream was reset",
    "rst_stream",
    "refused_stream",
    "refused stream",
    "stream cancelled",
    "stream canceled",
    "goaway",
    "client connection lost",
];

/// Closed set of failure classifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 401: credentials are missing or invalid.
    Unauthorized,
    /// 403 without any rate-limit signal.
    Forbidden,
    /// 404.
    NotFound,
    /// 400.
    BadRequest,
    /// Any 5xx.
    ServerError,
    /// Primary quota exhausted (429, or 403 with zero remaining).
    RateLimitExceeded,
    /// Secondary / abuse-detection throttle.
    SecondaryRateLimitExceeded,
    /// Client-side pre-emptive block with a known countdown.
    RateLimitBlocked,
    /// Connection or multiplexed-stream failure.
    StreamError,
    /// Nothing matched.
    Unclassified,
}

impl ErrorKind {
    /// Returns the snake_case name used in logs and serialized output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::ServerError => "server_error",
            ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
            ErrorKind::SecondaryRateLimitExceeded => "secondary_rate_limit_exceeded",
            ErrorKind::RateLimitBlocked => "rate_limit_blocked",
            ErrorKind::StreamError => "stream_error",
            ErrorKind::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload shared by every classification.
#[derive(Debug, Clone)]
pub struct ErrorDetail {
    /// HTTP status, when one was observed structurally or in text.
    pub status: Option<u16>,
    /// Full message of the original error chain.
    pub message: String,
    cause: Option<Arc<dyn StdError + Send + Sync>>,
}

impl ErrorDetail {
    /// Creates a detail without an underlying cause.
    #[must_use]
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            cause: None,
        }
    }

    /// The original error this detail was classified from.
    #[must_use]
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }
}

/// A failed platform call, classified once and never mutated.
#[derive(Debug, Clone)]
pub enum ClassifiedError {
    /// Credentials rejected.
    Unauthorized(ErrorDetail),
    /// Access denied for a reason other than rate limiting.
    Forbidden(ErrorDetail),
    /// Resource does not exist or is invisible to the credential.
    NotFound(ErrorDetail),
    /// Malformed request.
    BadRequest(ErrorDetail),
    /// Remote platform failure.
    ServerError(ErrorDetail),
    /// Primary quota exhausted.
    RateLimitExceeded(ErrorDetail),
    /// Secondary / abuse throttle.
    SecondaryRateLimitExceeded(ErrorDetail),
    /// Pre-emptive block; `reset_in` is the countdown parsed from the message.
    RateLimitBlocked {
        /// Error payload.
        detail: ErrorDetail,
        /// Countdown until the quota is expected to reset.
        reset_in: Duration,
    },
    /// Transport or stream failure.
    StreamError(ErrorDetail),
    /// Unrecognised failure.
    Unclassified(ErrorDetail),
}

impl ClassifiedError {
    fn from_parts(kind: ErrorKind, detail: ErrorDetail, reset_in: Option<Duration>) -> Self {
        match kind {
            ErrorKind::Unauthorized => Self::Unauthorized(detail),
            ErrorKind::Forbidden => Self::Forbidden(detail),
            ErrorKind::NotFound => Self::NotFound(detail),
            ErrorKind::BadRequest => Self::BadRequest(detail),
            ErrorKind::ServerError => Self::ServerError(detail),
            ErrorKind::RateLimitExceeded => Self::RateLimitExceeded(detail),
            ErrorKind::SecondaryRateLimitExceeded => Self::SecondaryRateLimitExceeded(detail),
            ErrorKind::RateLimitBlocked => Self::RateLimitBlocked {
                detail,
                reset_in: reset_in.unwrap_or_default(),
            },
            ErrorKind::StreamError => Self::StreamError(detail),
            ErrorKind::Unclassified => Self::Unclassified(detail),
        }
    }

    /// Returns the fieldless classification tag.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::ServerError(_) => ErrorKind::ServerError,
            Self::RateLimitExceeded(_) => ErrorKind::RateLimitExceeded,
            Self::SecondaryRateLimitExceeded(_) => ErrorKind::SecondaryRateLimitExceeded,
            Self::RateLimitBlocked { .. } => ErrorKind::RateLimitBlocked,
            Self::StreamError(_) => ErrorKind::StreamError,
            Self::Unclassified(_) => ErrorKind::Unclassified,
        }
    }

    /// Returns the shared payload.
    #[must_use]
    pub fn detail(&self) -> &ErrorDetail {
        match self {
            Self::Unauthorized(d)
            | Self::Forbidden(d)
            | Self::NotFound(d)
            | Self::BadRequest(d)
            | Self::ServerError(d)
            | Self::RateLimitExceeded(d)
            | Self::SecondaryRateLimitExceeded(d)
            | Self::StreamError(d)
            | Self::Unclassified(d)
            | Self::RateLimitBlocked { detail: d, .. } => d,
        }
    }

    /// HTTP status observed for this failure, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.detail().status
    }

    /// Original error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.detail().message
    }

    /// Whether another attempt may succeed.
    ///
    /// Server errors, all three rate-limit variants, and stream errors are
    /// retryable. Unclassified failures are retryable only when they carry a
    /// transient status code (see [`is_retryable_http`]).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ServerError(_)
            | Self::RateLimitExceeded(_)
            | Self::SecondaryRateLimitExceeded(_)
            | Self::RateLimitBlocked { .. }
            | Self::StreamError(_) => true,
            Self::Unclassified(d) => d.status.is_some_and(is_retryable_http),
            Self::Unauthorized(_) | Self::Forbidden(_) | Self::NotFound(_) | Self::BadRequest(_) => {
                false
            }
        }
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let detail = self.detail();
        match detail.status {
            Some(status) => write!(f, "{} (HTTP {status}): {}", self.kind(), detail.message),
            None => write!(f, "{}: {}", self.kind(), detail.message),
        }
    }
}

impl StdError for ClassifiedError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.detail()
            .cause()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

/// Whether a classified error is worth another attempt.
#[must_use]
pub fn retryable(err: &ClassifiedError) -> bool {
    err.is_retryable()
}

/// Determines if an HTTP status code is transient.
///
/// Retryable status codes are 429, 500, 502, 503, and 504.
#[must_use]
pub fn is_retryable_http(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Classifies a raw attempt failure, taking ownership of it as the cause.
#[must_use]
pub fn classify(err: anyhow::Error) -> ClassifiedError {
    let message = format!("{err:#}");
    let verdict = inspect(&err, &message);
    let cause: Box<dyn StdError + Send + Sync> = err.into();
    let detail = ErrorDetail {
        status: verdict.status,
        message,
        cause: Some(Arc::from(cause)),
    };
    ClassifiedError::from_parts(verdict.kind, detail, verdict.reset_in)
}

/// Returns only the classification tag, leaving the error with the caller.
#[must_use]
pub fn classify_kind(err: &anyhow::Error) -> ErrorKind {
    inspect(err, &format!("{err:#}")).kind
}

struct Verdict {
    kind: ErrorKind,
    status: Option<u16>,
    reset_in: Option<Duration>,
}

impl Verdict {
    fn new(kind: ErrorKind, status: Option<u16>) -> Self {
        Self {
            kind,
            status,
            reset_in: None,
        }
    }
}

#[derive(Default)]
struct Structured {
    status: Option<u16>,
    quota_exhausted: bool,
    graphql_kind: Option<ErrorKind>,
    transport: bool,
}

fn inspect(err: &anyhow::Error, message: &str) -> Verdict {
    let structured = structured_status(err);

    if let Some(kind) = structured.graphql_kind {
        return Verdict::new(kind, None);
    }

    if let Some(status) = structured.status
        && let Some(kind) = kind_for_status(status, structured.quota_exhausted, message)
    {
        return Verdict::new(kind, Some(status));
    }

    if let Some(status) = status_in_text(message)
        && let Some(kind) = kind_for_status(status, false, message)
    {
        return Verdict::new(kind, Some(status));
    }

    if SECONDARY_RATE_LIMIT.is_match(message) {
        return Verdict::new(ErrorKind::SecondaryRateLimitExceeded, structured.status);
    }

    if let Some(reset_in) = blocked_countdown(message) {
        return Verdict {
            kind: ErrorKind::RateLimitBlocked,
            status: structured.status,
            reset_in: Some(reset_in),
        };
    }

    if structured.transport || is_stream_failure(message) {
        return Verdict::new(ErrorKind::StreamError, structured.status);
    }

    Verdict::new(ErrorKind::Unclassified, structured.status)
}

fn structured_status(err: &anyhow::Error) -> Structured {
    let mut found = Structured::default();

    for cause in err.chain() {
        if let Some(http) = cause.downcast_ref::<HttpFailure>() {
            found.status = Some(http.status);
            found.quota_exhausted = http.rate_limit_remaining == Some(0);
            return found;
        }

        if let Some(graphql) = cause.downcast_ref::<GraphQlFailure>() {
            found.graphql_kind = graphql.structured_kind();
            return found;
        }

        if let Some(CredentialError::TokenExchange { status, .. }) =
            cause.downcast_ref::<CredentialError>()
        {
            found.status = Some(*status);
            return found;
        }

        if let Some(req_err) = cause.downcast_ref::<reqwest::Error>() {
            if let Some(status) = req_err.status() {
                found.status = Some(status.as_u16());
                return found;
            }
            if req_err.is_connect()
                || req_err.is_timeout()
                || req_err.is_body()
                || req_err.is_request()
            {
                found.transport = true;
            }
        }

        if let Some(oct_err) = cause.downcast_ref::<octocrab::Error>() {
            match oct_err {
                octocrab::Error::GitHub { source, .. } => {
                    found.status = Some(source.status_code.as_u16());
                    return found;
                }
                octocrab::Error::Service { .. } | octocrab::Error::Hyper { .. } => {
                    found.transport = true;
                }
                _ => {}
            }
        }
    }

    found
}

fn kind_for_status(status: u16, quota_exhausted: bool, message: &str) -> Option<ErrorKind> {
    match status {
        401 => Some(ErrorKind::Unauthorized),
        403 if quota_exhausted => Some(ErrorKind::RateLimitExceeded),
        403 | 429 if SECONDARY_RATE_LIMIT.is_match(message) => {
            Some(ErrorKind::SecondaryRateLimitExceeded)
        }
        403 if PRIMARY_RATE_LIMIT.is_match(message) => Some(ErrorKind::RateLimitExceeded),
        403 => Some(ErrorKind::Forbidden),
        404 => Some(ErrorKind::NotFound),
        400 => Some(ErrorKind::BadRequest),
        429 => Some(ErrorKind::RateLimitExceeded),
        500..=599 => Some(ErrorKind::ServerError),
        _ => None,
    }
}

fn status_in_text(message: &str) -> Option<u16> {
    let caps = TEXT_STATUS.captures(message)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .and_then(|m| m.as_str().parse().ok())
}

/// Extracts the countdown from a `rate reset in <N>(s|m)` message.
#[must_use]
pub fn blocked_countdown(message: &str) -> Option<Duration> {
    let caps = BLOCKED_COUNTDOWN.captures(message)?;
    let amount: u64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2)?.as_str();
    if unit.eq_ignore_ascii_case("m") {
        Some(Duration::from_secs(amount.saturating_mul(60)))
    } else {
        Some(Duration::from_secs(amount))
    }
}

fn is_stream_failure(message: &str) -> bool {
    let lower = message.to_lowercase();
    STREAM_FAILURE_FRAGMENTS
        .iter()
        .any(|fragment| lower.contains(fragment))
}
