// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport abstraction (C1–C3): a common request/response shape two
//! concrete transports implement, and the selector that negotiates which
//! one a given domain should use.

pub mod http2;
pub mod websocket;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ClientConfig, ConnectionMode};
use crate::error::Error;
use crate::model::ChangeFrame;

pub use http2::Http2Transport;
pub use websocket::WebSocketTransport;

/// The wire method of an outbound request (§6). `Ping` is never issued by
/// a caller; it is the WebSocket transport's internal heartbeat frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Head,
    Get,
    Put,
    Post,
    Delete,
    Watch,
    Unwatch,
    Ping,
}

impl Method {
    pub fn as_wire(self) -> &'static str {
        match self {
            Method::Head => "head",
            Method::Get => "get",
            Method::Put => "put",
            Method::Post => "post",
            Method::Delete => "delete",
            Method::Watch => "watch",
            Method::Unwatch => "unwatch",
            Method::Ping => "ping",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// A request addressed to a transport. `request_id` is assigned by the
/// caller if present, else generated by the transport.
#[derive(Debug, Clone)]
pub struct ConnectionRequest {
    pub method: Method,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub data: Option<serde_json::Value>,
    pub request_id: Option<String>,
}

impl ConnectionRequest {
    pub fn new(method: Method, path: impl Into<String>) -> ConnectionRequest {
        ConnectionRequest {
            method,
            path: path.into(),
            headers: HashMap::new(),
            data: None,
            request_id: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// The unified response shape both transports produce (§4.2, §4.3).
#[derive(Debug, Clone)]
pub struct ConnectionResponse {
    pub request_id: String,
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub data: Option<serde_json::Value>,
}

impl ConnectionResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Invoked by a transport for every change frame delivered on a watch's
/// request id. Never calls into application code directly; the Watch
/// Manager's registered callback forwards into a bounded channel (§9).
pub type WatchCallback = Arc<dyn Fn(ChangeFrame) + Send + Sync>;

/// Transport-independent request multiplexing (C2/C3's shared contract).
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Issue a one-shot request and await its response.
    async fn request(
        &self,
        req: ConnectionRequest,
        timeout: Option<Duration>,
    ) -> Result<ConnectionResponse, Error>;

    /// Issue a request whose responses (the initial 2xx plus subsequent
    /// change frames) are long-lived. `callback` receives every change
    /// frame addressed to the assigned request id until the watch is
    /// torn down.
    async fn watch(
        &self,
        req: ConnectionRequest,
        timeout: Option<Duration>,
        callback: WatchCallback,
    ) -> Result<ConnectionResponse, Error>;

    /// Remove a persistent request record so no further change frames are
    /// dispatched for it, and tell the server to stop the subscription.
    async fn unwatch(&self, request_id: &str) -> Result<(), Error>;

    /// Tear down the transport. Outstanding non-persistent requests are
    /// rejected with [`Error::ConnectionReset`]; persistent records are
    /// simply dropped (the Watch Manager closes their change sequences).
    async fn disconnect(&self);

    /// A channel that fires once per successful (re)connection of
    /// whichever socket actually carries watch traffic, so the Watch
    /// Manager can re-issue active watches after a reconnect. `None`
    /// when no such socket exists yet (e.g. an HTTP/2 transport whose
    /// WebSocket sidecar has not been created by a first `watch` call).
    fn subscribe_open(&self) -> Option<tokio::sync::broadcast::Receiver<()>> {
        None
    }
}

/// Negotiates HTTP/2 vs WebSocket for a domain (C1).
pub struct Selector;

impl Selector {
    /// Build the transport `config.connection` calls for, probing via
    /// ALPN negotiation when set to [`ConnectionMode::Auto`].
    ///
    /// `https:`/`http2:` origins offer `{h2, http/1.1, http/1.0}`/`{h2}`;
    /// `http:` origins offer `{http/1.1, http/1.0}` only, so an `Auto`
    /// probe against a plain `http://` origin always falls through to
    /// WebSocket. Any probe failure (connect error, TLS failure) falls
    /// back to an HTTP/2 transport over HTTPS rather than propagating.
    pub async fn select(config: &ClientConfig) -> Result<Arc<dyn Transport>, Error> {
        match config.connection {
            ConnectionMode::Http2 => Ok(Arc::new(Http2Transport::connect(config).await?)),
            ConnectionMode::WebSocket => Ok(Arc::new(WebSocketTransport::connect(config).await?)),
            ConnectionMode::Auto => Self::probe(config).await,
        }
    }

    async fn probe(config: &ClientConfig) -> Result<Arc<dyn Transport>, Error> {
        match Http2Transport::connect(config).await {
            Ok(transport) if transport.negotiated_h2() => {
                tracing::debug!(domain = config.domain(), "ALPN probe negotiated h2");
                Ok(Arc::new(transport))
            }
            Ok(_) => {
                tracing::debug!(domain = config.domain(), "ALPN probe negotiated http/1.x, using websocket");
                Ok(Arc::new(WebSocketTransport::connect(config).await?))
            }
            Err(err) => {
                tracing::warn!(domain = config.domain(), error = %err, "ALPN probe failed, falling back to http/2");
                Ok(Arc::new(Http2Transport::connect(config).await?))
            }
        }
    }
}
