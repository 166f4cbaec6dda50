// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client configuration.

use std::time::Duration;

/// Which transport to use, or let the [`crate::transport::Selector`]
/// negotiate one via ALPN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionMode {
    #[default]
    Auto,
    WebSocket,
    Http2,
}

/// Per-request-class timeouts.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub request: Duration,
    pub connect: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts { request: Duration::from_secs(30), connect: Duration::from_secs(10) }
    }
}

/// Configuration for an OADA client connection.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Normalized `https://host` (or `http://host`) origin, scheme always
    /// present.
    domain: String,
    pub token: String,
    pub concurrency: usize,
    pub connection: ConnectionMode,
    pub user_agent: String,
    pub timeouts: Timeouts,
    accept_invalid_certs: bool,
}

impl ClientConfig {
    /// Build a config from a domain (with or without scheme) and bearer
    /// token. `domain` is normalized per §6: a bare hostname is treated as
    /// `https://<hostname>`.
    pub fn new(domain: impl AsRef<str>, token: impl Into<String>) -> ClientConfig {
        ClientConfig {
            domain: normalize_domain(domain.as_ref()),
            token: token.into(),
            concurrency: 1,
            connection: ConnectionMode::default(),
            user_agent: format!("oada-client/{}", env!("CARGO_PKG_VERSION")),
            timeouts: Timeouts::default(),
            accept_invalid_certs: false,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> ClientConfig {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_connection(mut self, mode: ConnectionMode) -> ClientConfig {
        self.connection = mode;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> ClientConfig {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> ClientConfig {
        self.timeouts = timeouts;
        self
    }

    /// Disable TLS certificate validation. Internal/test use only — the
    /// Rust equivalent of setting `NODE_TLS_REJECT_UNAUTHORIZED=0`.
    pub fn accept_invalid_certs(mut self, accept: bool) -> ClientConfig {
        self.accept_invalid_certs = accept;
        self
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn tls_validation_disabled(&self) -> bool {
        self.accept_invalid_certs
    }
}

/// Normalize a domain: if no scheme is present, assume `https`.
/// `example.com` and `https://example.com` normalize to the same origin;
/// any trailing slash is stripped.
pub fn normalize_domain(raw: &str) -> String {
    let trimmed = raw.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_owned()
    } else {
        format!("https://{trimmed}")
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
