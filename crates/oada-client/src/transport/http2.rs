// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP/2 transport (C2): one request per response over a shared
//! `reqwest` client. Watches are not representable over HTTP/2, so a
//! `watch` call lazily promotes a WebSocket sidecar used for watch and
//! unwatch traffic only; ordinary requests never touch it.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Method as HttpMethod;
use tokio::sync::OnceCell;

use super::{ConnectionRequest, ConnectionResponse, Method, Transport, WatchCallback};
use crate::config::ClientConfig;
use crate::error::Error;
use crate::queue::RequestQueue;

use super::websocket::WebSocketTransport;

pub struct Http2Transport {
    client: reqwest::Client,
    origin: String,
    queue: RequestQueue,
    negotiated_h2: bool,
    config: ClientConfig,
    sidecar: OnceCell<WebSocketTransport>,
}

impl Http2Transport {
    /// Connect and perform the readiness probe: a HEAD to `/bookmarks`.
    /// Status < 400 signals "open"; the HTTP version reqwest negotiated
    /// on that request tells the Selector whether this origin actually
    /// speaks h2 or fell back to http/1.1.
    pub async fn connect(config: &ClientConfig) -> Result<Http2Transport, Error> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.timeouts.connect)
            .danger_accept_invalid_certs(config.tls_validation_disabled())
            .build()?;

        let probe_url = format!("{}/bookmarks", config.domain());
        let response = client
            .head(&probe_url)
            .bearer_auth(&config.token)
            .send()
            .await?;
        let negotiated_h2 = response.version() == reqwest::Version::HTTP_2;
        if response.status().as_u16() >= 400 {
            tracing::debug!(status = %response.status(), "readiness probe returned non-2xx, transport still usable");
        } else {
            tracing::debug!("http/2 transport connected");
        }

        Ok(Http2Transport {
            client,
            origin: config.domain().to_owned(),
            queue: RequestQueue::new(config.concurrency),
            negotiated_h2,
            config: config.clone(),
            sidecar: OnceCell::new(),
        })
    }

    pub fn negotiated_h2(&self) -> bool {
        self.negotiated_h2
    }

    async fn sidecar(&self) -> Result<&WebSocketTransport, Error> {
        self.sidecar
            .get_or_try_init(|| async { WebSocketTransport::connect(&self.config).await })
            .await
    }

    fn build_request(&self, req: &ConnectionRequest) -> Result<reqwest::RequestBuilder, Error> {
        let method = match req.method {
            Method::Head => HttpMethod::HEAD,
            Method::Get => HttpMethod::GET,
            Method::Put => HttpMethod::PUT,
            Method::Post => HttpMethod::POST,
            Method::Delete => HttpMethod::DELETE,
            other => return Err(Error::Protocol(format!("{other} is not representable over HTTP/2"))),
        };
        let url = format!("{}{}", self.origin, req.path);
        let mut builder = self.client.request(method, url);
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(data) = &req.data {
            builder = builder.json(data);
        }
        Ok(builder)
    }
}

#[async_trait::async_trait]
impl Transport for Http2Transport {
    async fn request(
        &self,
        req: ConnectionRequest,
        timeout: Option<Duration>,
    ) -> Result<ConnectionResponse, Error> {
        let request_id = req.request_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let timeout = timeout.unwrap_or(self.config.timeouts.request);

        self.queue
            .submit(|| async {
                let builder = self.build_request(&req)?;
                let send = builder
                    .try_clone()
                    .ok_or_else(|| Error::Protocol("request body is not cloneable for retry".into()))?
                    .send();

                let response = match tokio::time::timeout(timeout, send).await {
                    Ok(result) => result?,
                    Err(_) => return Err(Error::Timeout),
                };

                let status = response.status().as_u16();
                let status_text = response.status().canonical_reason().unwrap_or("").to_owned();
                let headers: HashMap<String, String> = response
                    .headers()
                    .iter()
                    .map(|(k, v)| (k.as_str().to_ascii_lowercase(), v.to_str().unwrap_or("").to_owned()))
                    .collect();

                let is_json = headers
                    .get("content-type")
                    .map(|ct| ct.contains("json"))
                    .unwrap_or(false);
                let bytes = response.bytes().await?;
                let data = if bytes.is_empty() {
                    None
                } else if is_json {
                    Some(serde_json::from_slice(&bytes)?)
                } else {
                    Some(serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned()))
                };

                if (200..300).contains(&status) {
                    Ok(ConnectionResponse {
                        request_id: request_id.clone(),
                        status,
                        status_text,
                        headers,
                        data,
                    })
                } else {
                    Err(Error::from_response(status, &status_text, headers, data.unwrap_or(serde_json::Value::Null)))
                }
            })
            .await
    }

    async fn watch(
        &self,
        req: ConnectionRequest,
        timeout: Option<Duration>,
        callback: WatchCallback,
    ) -> Result<ConnectionResponse, Error> {
        self.sidecar().await?.watch(req, timeout, callback).await
    }

    async fn unwatch(&self, request_id: &str) -> Result<(), Error> {
        self.sidecar().await?.unwatch(request_id).await
    }

    async fn disconnect(&self) {
        if let Some(ws) = self.sidecar.get() {
            ws.disconnect().await;
        }
    }

    fn subscribe_open(&self) -> Option<tokio::sync::broadcast::Receiver<()>> {
        self.sidecar.get().and_then(|ws| ws.subscribe_open())
    }
}
