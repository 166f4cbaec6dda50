// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error kinds and response normalization.
//!
//! Every non-2xx response or protocol failure is normalized into one of the
//! structural kinds below before it is returned to a caller or retried by
//! the request queue. The raw server response (status, headers, body) is
//! always retained on [`Error::Response`] so nothing is hidden behind a
//! flattened message.

use std::collections::HashMap;
use std::time::Duration;

/// Default wait when a `429`/`503` carries no parseable retry hint (§4.4).
pub const DEFAULT_RETRY_TIMEOUT: Duration = Duration::from_secs(300);

/// Fixed wait before retrying after a connection reset (§4.4).
pub const CONNECTION_RESET_WAIT: Duration = Duration::from_secs(10);

/// A normalized error kind, matching the taxonomy in the component design.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A request's timeout elapsed before a response arrived.
    #[error("request timed out")]
    Timeout,

    /// 401/403 — the server rejected the credentials.
    #[error("unauthorized (status {status})")]
    Unauthorized { status: u16 },

    /// 404 (or 403 under `/resources/*`, which the server uses to hide
    /// existence and which this crate treats as equivalent to 404).
    #[error("not found")]
    NotFound,

    /// 412 — a conditional (`If-Match`) write lost a race with another
    /// writer.
    #[error("precondition failed")]
    PreconditionFailed,

    /// 429, or 503 carrying a `Retry-After`/rate-limit header. `wait` is
    /// the duration the request queue should sleep before retrying,
    /// already resolved to [`DEFAULT_RETRY_TIMEOUT`] when the response
    /// carried no parseable hint.
    #[error("rate limited, retry after {wait:?}")]
    RateLimited { wait: Duration },

    /// The underlying connection was reset; the request queue retries
    /// these after a fixed delay.
    #[error("connection reset")]
    ConnectionReset,

    /// A malformed frame, an unrecognized ALPN token, or any other
    /// violation of the wire contract.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A tree-GET expected a subtree at `path` but the server returned a
    /// scalar, null, or otherwise incompatible shape.
    #[error("tree/data shape mismatch at {path}")]
    PathMismatch { path: String },

    /// Tree-PUT exhausted its If-Match retry budget.
    #[error("If-Match retries exhausted after {attempts} attempts")]
    IfMatchExhausted { attempts: u32 },

    /// An operation that has no defined behavior for its input (e.g. a
    /// tree-GET whose root does not exist on the server).
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Any other non-2xx response, with the raw wire data preserved.
    #[error("{message}")]
    Response {
        status: u16,
        status_text: String,
        headers: HashMap<String, String>,
        body: serde_json::Value,
        message: String,
    },

    /// Transport-level HTTP failure (connect, TLS, I/O).
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Transport-level WebSocket failure.
    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A frame or body failed to parse as JSON.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns true if this is the structural kind the request queue
    /// retries on (§4.4): 429, 503 with a rate-limit header, or a
    /// connection reset.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::RateLimited { .. } | Error::ConnectionReset)
    }

    /// True for 401/403.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Unauthorized { .. })
    }

    /// Normalize a non-2xx HTTP/WS response into a structural [`Error`],
    /// per the classification and message-derivation rules.
    ///
    /// Message derivation order: parsed JSON body `.message` → `"<status>
    /// <statusText>"` → `"<status>"`.
    pub fn from_response(
        status: u16,
        status_text: &str,
        headers: HashMap<String, String>,
        body: serde_json::Value,
    ) -> Error {
        match status {
            401 | 403 => Error::Unauthorized { status },
            404 => Error::NotFound,
            412 => Error::PreconditionFailed,
            429 => Error::RateLimited { wait: retry_wait(&headers) },
            503 if has_rate_limit_header(&headers) => {
                Error::RateLimited { wait: retry_wait(&headers) }
            }
            _ => {
                let message = body
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(str::to_owned)
                    .unwrap_or_else(|| {
                        if status_text.is_empty() {
                            status.to_string()
                        } else {
                            format!("{status} {status_text}")
                        }
                    });
                Error::Response { status, status_text: status_text.to_owned(), headers, body, message }
            }
        }
    }
}

fn has_rate_limit_header(headers: &HashMap<String, String>) -> bool {
    ["retry-after", "ratelimit-reset", "x-ratelimit-reset"]
        .iter()
        .any(|h| headers.contains_key(*h))
}

/// `max(Retry-After, RateLimit-Reset, X-RateLimit-Reset)` in seconds,
/// falling back to [`DEFAULT_RETRY_TIMEOUT`] when none parse.
fn retry_wait(headers: &HashMap<String, String>) -> Duration {
    ["retry-after", "ratelimit-reset", "x-ratelimit-reset"]
        .iter()
        .filter_map(|h| headers.get(*h))
        .filter_map(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .max()
        .unwrap_or(DEFAULT_RETRY_TIMEOUT)
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
