// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket transport (C3): one bidirectional socket multiplexing every
//! concurrent request by client-assigned `requestId`, dispatching change
//! frames to their watch's callback, and transparently reconnecting with
//! backoff. Request-id correlation here mirrors the bridging pattern used
//! elsewhere in this codebase for proxying requests across a reconnecting
//! upstream socket.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::{ConnectionRequest, ConnectionResponse, Method, Transport, WatchCallback};
use crate::config::ClientConfig;
use crate::error::Error;
use crate::model::ChangeFrame;
use crate::queue::RequestQueue;

const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(250);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(5);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const HEARTBEAT_GRACE: Duration = Duration::from_secs(10);

struct PendingRequest {
    resolver: Option<oneshot::Sender<Result<ConnectionResponse, Error>>>,
    callback: Option<WatchCallback>,
    persistent: bool,
    settled: bool,
}

type Table = Arc<Mutex<HashMap<String, PendingRequest>>>;

/// A live (or reconnecting) WebSocket connection to an OADA server.
pub struct WebSocketTransport {
    table: Table,
    outbound: mpsc::UnboundedSender<String>,
    open: broadcast::Sender<()>,
    queue: RequestQueue,
    config: ClientConfig,
    cancel: CancellationToken,
    closed: Arc<AtomicBool>,
}

impl WebSocketTransport {
    pub async fn connect(config: &ClientConfig) -> Result<WebSocketTransport, Error> {
        let table: Table = Arc::new(Mutex::new(HashMap::new()));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (open_tx, _) = broadcast::channel(16);
        let cancel = CancellationToken::new();
        let closed = Arc::new(AtomicBool::new(false));

        let url = ws_url(config.domain());
        tokio::spawn(run_loop(
            url,
            config.clone(),
            table.clone(),
            outbound_rx,
            open_tx.clone(),
            cancel.clone(),
        ));

        Ok(WebSocketTransport {
            table,
            outbound: outbound_tx,
            open: open_tx,
            queue: RequestQueue::new(config.concurrency),
            config: config.clone(),
            cancel,
            closed,
        })
    }

    /// Fires once per successful (re)connection, including the first.
    /// The Watch Manager subscribes to re-issue active watches after
    /// every reconnect.
    pub fn subscribe_open(&self) -> broadcast::Receiver<()> {
        self.open.subscribe()
    }

    fn send_frame(&self, req: &ConnectionRequest) -> Result<(), Error> {
        let frame = serde_json::json!({
            "requestId": req.request_id,
            "method": req.method.as_wire(),
            "path": req.path,
            "headers": req.headers,
            "data": req.data,
        });
        let text = serde_json::to_string(&frame)?;
        self.outbound
            .send(text)
            .map_err(|_| Error::ConnectionReset)
    }

    async fn roundtrip(
        &self,
        mut req: ConnectionRequest,
        timeout: Option<Duration>,
        callback: Option<WatchCallback>,
    ) -> Result<ConnectionResponse, Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionReset);
        }
        let request_id = req.request_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        req.request_id = Some(request_id.clone());
        let persistent = callback.is_some();
        let timeout = timeout.unwrap_or(self.config.timeouts.request);

        let (tx, rx) = oneshot::channel();
        {
            let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            table.insert(
                request_id.clone(),
                PendingRequest { resolver: Some(tx), callback, persistent, settled: false },
            );
        }

        self.send_frame(&req)?;

        let result = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionReset),
            Err(_) => {
                let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
                table.remove(&request_id);
                return Err(Error::Timeout);
            }
        };
        result
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn request(
        &self,
        req: ConnectionRequest,
        timeout: Option<Duration>,
    ) -> Result<ConnectionResponse, Error> {
        self.queue.submit(|| self.roundtrip(req.clone(), timeout, None)).await
    }

    async fn watch(
        &self,
        req: ConnectionRequest,
        timeout: Option<Duration>,
        callback: WatchCallback,
    ) -> Result<ConnectionResponse, Error> {
        self.queue.submit(|| self.roundtrip(req.clone(), timeout, Some(callback.clone()))).await
    }

    async fn unwatch(&self, request_id: &str) -> Result<(), Error> {
        let req = ConnectionRequest::new(Method::Unwatch, "")
            .with_request_id(request_id.to_owned())
            .with_header("authorization", "");
        let result = self.request(req, None).await;
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.remove(request_id);
        result.map(|_| ())
    }

    async fn disconnect(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.cancel.cancel();
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        for (_, mut record) in table.drain() {
            if let Some(resolver) = record.resolver.take() {
                let _ = resolver.send(Err(Error::ConnectionReset));
            }
        }
    }

    fn subscribe_open(&self) -> Option<broadcast::Receiver<()>> {
        Some(self.open.subscribe())
    }
}

fn ws_url(domain: &str) -> String {
    if let Some(rest) = domain.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = domain.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("wss://{domain}")
    }
}

/// Owns the actual socket: connects, reconnects with backoff on loss,
/// drives the heartbeat watchdog, and dispatches inbound frames against
/// the shared request table.
async fn run_loop(
    url: String,
    _config: ClientConfig,
    table: Table,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    open: broadcast::Sender<()>,
    cancel: CancellationToken,
) {
    let mut backoff = RECONNECT_BASE_DELAY;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        tracing::debug!(url = %url, "websocket connecting");
        let socket = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((socket, _response)) => socket,
            Err(err) => {
                tracing::warn!(error = %err, wait_ms = backoff.as_millis(), "websocket connect failed, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => return,
                }
                backoff = (backoff * 2).min(RECONNECT_MAX_DELAY);
                continue;
            }
        };
        backoff = RECONNECT_BASE_DELAY;
        tracing::debug!("websocket connected");
        let _ = open.send(());

        let (mut write, mut read) = socket.split();
        let mut ping_due = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_due.tick().await;
        let mut watchdog = Box::pin(tokio::time::sleep(HEARTBEAT_INTERVAL + HEARTBEAT_GRACE));

        let reset_reason = 'connection: loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                outgoing = outbound_rx.recv() => {
                    match outgoing {
                        Some(text) => {
                            if write.send(Message::Text(text.into())).await.is_err() {
                                break 'connection "write failed";
                            }
                        }
                        None => return,
                    }
                }
                _ = ping_due.tick() => {
                    if write.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break 'connection "ping failed";
                    }
                }
                _ = &mut watchdog => {
                    break 'connection "heartbeat timed out";
                }
                incoming = read.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            watchdog.as_mut().reset(tokio::time::Instant::now() + HEARTBEAT_INTERVAL + HEARTBEAT_GRACE);
                            ping_due.reset();
                            dispatch_frame(&table, text.as_str());
                        }
                        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                            watchdog.as_mut().reset(tokio::time::Instant::now() + HEARTBEAT_INTERVAL + HEARTBEAT_GRACE);
                            ping_due.reset();
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            break 'connection "socket closed";
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            tracing::warn!(error = %err, "websocket read error");
                            break 'connection "read error";
                        }
                    }
                }
            }
        };

        tracing::warn!(reason = reset_reason, "websocket reset, rejecting non-persistent requests");
        reject_non_persistent(&table);
    }
}

fn reject_non_persistent(table: &Table) {
    let mut table = table.lock().unwrap_or_else(|e| e.into_inner());
    table.retain(|_, record| {
        if record.persistent {
            true
        } else {
            if let Some(resolver) = record.resolver.take() {
                let _ = resolver.send(Err(Error::ConnectionReset));
            }
            false
        }
    });
}

fn dispatch_frame(table: &Table, text: &str) {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(error = %err, "dropping malformed websocket frame");
            return;
        }
    };

    let request_ids = normalize_request_ids(&value);
    if request_ids.is_empty() {
        return;
    }

    if value.get("change").is_some() {
        dispatch_change(table, &value, &request_ids);
    } else if value.get("status").is_some() {
        dispatch_response(table, &value, &request_ids);
    }
}

fn normalize_request_ids(value: &serde_json::Value) -> Vec<String> {
    match value.get("requestId") {
        Some(serde_json::Value::String(s)) => vec![s.clone()],
        Some(serde_json::Value::Array(items)) => {
            items.iter().filter_map(|v| v.as_str()).map(str::to_owned).collect()
        }
        _ => Vec::new(),
    }
}

fn dispatch_response(table: &Table, value: &serde_json::Value, request_ids: &[String]) {
    let status = value.get("status").and_then(|v| v.as_u64()).unwrap_or(0) as u16;
    let status_text = value.get("statusText").and_then(|v| v.as_str()).unwrap_or("").to_owned();
    let headers: HashMap<String, String> = value
        .get("headers")
        .and_then(|v| v.as_object())
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.to_ascii_lowercase(), s.to_owned())))
                .collect()
        })
        .unwrap_or_default();
    let data = value.get("data").cloned();

    for id in request_ids {
        let mut table = table.lock().unwrap_or_else(|e| e.into_inner());
        let Some(record) = table.get_mut(id) else { continue };
        if record.settled {
            continue;
        }
        record.settled = true;
        let result = if (200..300).contains(&status) {
            Ok(ConnectionResponse { request_id: id.clone(), status, status_text: status_text.clone(), headers: headers.clone(), data: data.clone() })
        } else {
            Err(Error::from_response(status, &status_text, headers.clone(), data.clone().unwrap_or(serde_json::Value::Null)))
        };
        if let Some(resolver) = record.resolver.take() {
            let _ = resolver.send(result);
        }
        if !record.persistent {
            table.remove(id);
        }
    }
}

fn dispatch_change(table: &Table, value: &serde_json::Value, request_ids: &[String]) {
    let resource_id = value.get("resourceId").and_then(|v| v.as_str()).unwrap_or("").to_owned();
    let path_leftover = value.get("path_leftover").and_then(|v| v.as_str()).unwrap_or("").to_owned();
    let changes: Vec<crate::model::Change> = value
        .get("change")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();

    let frame = ChangeFrame { request_ids: request_ids.to_vec(), resource_id, path_leftover, changes };

    for id in request_ids {
        let table = table.lock().unwrap_or_else(|e| e.into_inner());
        let Some(record) = table.get(id) else { continue };
        if let Some(callback) = &record.callback {
            callback(frame.clone());
        }
    }
}

#[cfg(test)]
#[path = "websocket_tests.rs"]
mod tests;
