//! Typed error definitions for the Meridian client.
//!
//! [`MeridianError`] covers every failure the client surfaces to callers. Each
//! variant maps to exactly one [`FailureKind`], which is what the retry engine
//! and the streaming session use to decide between retrying and giving up.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

/// How a failed attempt is treated by the retry/reconnect machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection-level fault (reset, DNS, timeout) — retried with backoff.
    TransientNetwork,
    /// Server-side overload status (502/503/504 by default) — retried with backoff.
    TransientServer,
    /// HTTP 429 — retried, honoring a server-supplied resume hint when present.
    RateLimited,
    /// Anything retrying cannot fix — surfaced immediately.
    Fatal,
}

/// Server-supplied hint for when a rate-limited request may resume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryHint {
    /// Wait this long before the next attempt (`Retry-After: <secs>`).
    After(Duration),
    /// Do not retry before this instant (rate-limit window reset).
    Until(DateTime<Utc>),
}

/// Structured error payload returned by the Meridian API on 4xx/5xx responses.
///
/// All fields are optional — the server omits what does not apply, and a
/// non-JSON body leaves the whole struct absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    /// Vendor-specific numeric error code.
    pub code: Option<i64>,
    /// Human-readable message.
    pub message: Option<String>,
    /// Symbol the error refers to, if any.
    pub symbol: Option<String>,
}

/// Domain-specific errors for the Meridian client.
#[derive(Debug, Error)]
pub enum MeridianError {
    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// A request that failed local validation before being sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Connection-level failure (reset, DNS, TLS, broken pipe).
    #[error("network error: {0}")]
    Network(String),

    /// A single attempt exceeded the configured request timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// HTTP 429 with an optional server-supplied resume hint.
    #[error("rate limited by server")]
    RateLimited { hint: Option<RetryHint> },

    /// Any other non-success HTTP status, with the decoded error body when
    /// the server returned one we could parse.
    #[error("api error (HTTP {status}): {raw}")]
    Http {
        status: u16,
        body: Option<ApiErrorBody>,
        raw: String,
    },

    /// Credential rejection — never retried.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// WebSocket connection, handshake, or send/receive error.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Response or frame body that could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),

    /// The operation was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// The streaming session reached a terminal state.
    #[error("session terminated: {0}")]
    Terminated(String),
}

impl MeridianError {
    /// Classify this error for retry purposes.
    ///
    /// `retryable_statuses` is the policy-supplied set of HTTP statuses
    /// treated as transient server faults (502/503/504 by default).
    pub fn failure_kind(&self, retryable_statuses: &[u16]) -> FailureKind {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::WebSocket(_) => {
                FailureKind::TransientNetwork
            }
            Self::RateLimited { .. } => FailureKind::RateLimited,
            Self::Http { status, .. } if retryable_statuses.contains(status) => {
                FailureKind::TransientServer
            }
            _ => FailureKind::Fatal,
        }
    }

    /// The server's resume hint, present only on rate-limit errors.
    pub fn retry_hint(&self) -> Option<RetryHint> {
        match self {
            Self::RateLimited { hint } => *hint,
            _ => None,
        }
    }
}
