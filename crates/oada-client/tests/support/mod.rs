// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A minimal in-process OADA-shaped server for integration tests: a flat
//! path-keyed resource store reachable over both HTTP and the WebSocket
//! wire contract `oada_client::transport::websocket` speaks. Not a faithful
//! OADA server (no link traversal, no real auth) — just enough of the wire
//! shape to exercise the client end to end.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path as AxPath, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

static CRYPTO_PROVIDER: Once = Once::new();

/// Install the rustls crypto provider once per process; needed for
/// `reqwest` even against a plain `http://` loopback server.
pub fn ensure_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

#[derive(Debug, Clone, Default)]
struct Entry {
    body: Value,
    rev: u64,
}

struct Store {
    resources: HashMap<String, Entry>,
    flaky_seen: bool,
    /// Fires to every live `ws_session` task, telling it to drop its
    /// socket — simulates a server-initiated disconnect for reconnect
    /// tests.
    kick: broadcast::Sender<()>,
}

impl Default for Store {
    fn default() -> Store {
        let (kick, _) = broadcast::channel(16);
        Store { resources: HashMap::new(), flaky_seen: false, kick }
    }
}

pub type SharedStore = Arc<Mutex<Store>>;

/// Start the mock server on a random loopback port and return its base
/// `http://127.0.0.1:<port>` origin.
pub async fn spawn_server() -> String {
    spawn_server_with_store().await.0
}

/// Like [`spawn_server`], but also returns the shared store so a test can
/// introspect resources created along the way, or force a reconnect.
pub async fn spawn_server_with_store() -> (String, SharedStore) {
    ensure_crypto_provider();
    let store: SharedStore = Arc::new(Mutex::new(Store::default()));
    let app = Router::new()
        .route("/slow", get(slow_handler))
        .route("/flaky", any(flaky_handler))
        // `ws_url` dials the bare origin (matching a real OADA server,
        // whose WebSocket endpoint is the domain root, not a subpath).
        .route("/", get(ws_upgrade))
        .route(
            "/{*path}",
            get(get_handler).put(put_handler).post(post_handler).delete(delete_handler).head(head_handler),
        )
        .with_state(store.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback listener");
    let addr = listener.local_addr().expect("listener has a local address");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), store)
}

/// Force every currently-connected WebSocket session to drop its socket.
pub fn kick_websockets(store: &SharedStore) {
    let store = store.lock().unwrap_or_else(|e| e.into_inner());
    let _ = store.kick.send(());
}

/// Count distinct `/resources/<id>` entries in the store — each tree-PUT
/// boundary creation mints one.
pub fn resource_count(store: &SharedStore) -> usize {
    let store = store.lock().unwrap_or_else(|e| e.into_inner());
    store.resources.keys().filter(|k| k.starts_with("/resources/")).count()
}

fn merge(target: &mut Value, incoming: &Value) {
    match incoming {
        Value::Object(incoming_obj) => {
            if !target.is_object() {
                *target = json!({});
            }
            let target_obj = target.as_object_mut().expect("just coerced to object above");
            for (key, value) in incoming_obj {
                if value.is_null() {
                    target_obj.remove(key);
                } else {
                    let slot = target_obj.entry(key.clone()).or_insert(Value::Null);
                    merge(slot, value);
                }
            }
        }
        other => *target = other.clone(),
    }
}

fn key_for(path: &str) -> String {
    format!("/{path}")
}

async fn head_handler(State(store): State<SharedStore>, AxPath(path): AxPath<String>) -> Response {
    let store = store.lock().unwrap_or_else(|e| e.into_inner());
    match store.resources.get(&key_for(&path)) {
        Some(entry) => (StatusCode::OK, [("x-oada-rev", entry.rev.to_string())]).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn get_handler(State(store): State<SharedStore>, AxPath(path): AxPath<String>) -> Response {
    let store = store.lock().unwrap_or_else(|e| e.into_inner());
    match store.resources.get(&key_for(&path)) {
        Some(entry) => {
            let mut body = entry.body.clone();
            if let Some(obj) = body.as_object_mut() {
                obj.insert("_rev".to_owned(), json!(entry.rev));
            }
            (StatusCode::OK, [("x-oada-rev", entry.rev.to_string())], Json(body)).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn put_handler(
    State(store): State<SharedStore>,
    AxPath(path): AxPath<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let key = key_for(&path);
    let mut store = store.lock().unwrap_or_else(|e| e.into_inner());

    let has_if_match = headers.get("if-match").is_some();
    if key == "/bookmarks/T/conflict" && has_if_match {
        // Simulates a resource under permanent contention: any conditional
        // write to it loses the race, forever.
        return StatusCode::PRECONDITION_FAILED.into_response();
    }

    let current_rev = store.resources.get(&key).map(|e| e.rev);
    if let (Some(if_match), Some(current)) =
        (headers.get("if-match").and_then(|v| v.to_str().ok()), current_rev)
    {
        if if_match != current.to_string() {
            return StatusCode::PRECONDITION_FAILED.into_response();
        }
    }

    let entry = store.resources.entry(key.clone()).or_insert_with(Entry::default);
    merge(&mut entry.body, &body);
    if current_rev.is_some() {
        entry.rev += 1;
    }
    let rev = entry.rev;

    (StatusCode::OK, [("x-oada-rev", rev.to_string()), ("content-location", key)]).into_response()
}

async fn post_handler(
    State(store): State<SharedStore>,
    AxPath(path): AxPath<String>,
    Json(body): Json<Value>,
) -> Response {
    let id = uuid::Uuid::new_v4().to_string();
    let key = format!("/{path}/{id}");
    let mut store = store.lock().unwrap_or_else(|e| e.into_inner());
    store.resources.insert(key.clone(), Entry { body, rev: 0 });

    (StatusCode::CREATED, [("x-oada-rev", "0".to_owned()), ("content-location", key)]).into_response()
}

async fn delete_handler(State(store): State<SharedStore>, AxPath(path): AxPath<String>) -> Response {
    let mut store = store.lock().unwrap_or_else(|e| e.into_inner());
    store.resources.remove(&key_for(&path));
    StatusCode::NO_CONTENT.into_response()
}

/// Never responds within the 1ms timeout boundary test expects.
async fn slow_handler() -> Response {
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    StatusCode::OK.into_response()
}

/// 429 with `Retry-After: 1` on the first hit, 200 afterward.
async fn flaky_handler(State(store): State<SharedStore>) -> Response {
    let mut store = store.lock().unwrap_or_else(|e| e.into_inner());
    if !store.flaky_seen {
        store.flaky_seen = true;
        return (StatusCode::TOO_MANY_REQUESTS, [("retry-after", "1")]).into_response();
    }
    (StatusCode::OK, [("x-oada-rev", "0")], Json(json!({"ok": true}))).into_response()
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(store): State<SharedStore>) -> Response {
    ws.on_upgrade(move |socket| ws_session(socket, store))
}

async fn ws_session(socket: WebSocket, store: SharedStore) {
    let (mut sink, mut stream) = socket.split();
    let mut watches: HashMap<String, String> = HashMap::new();
    let mut kicked = { store.lock().unwrap_or_else(|e| e.into_inner()).kick.subscribe() };

    loop {
        let text = tokio::select! {
            _ = kicked.recv() => break,
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => text,
                _ => break,
            },
        };
        let Ok(frame) = serde_json::from_str::<Value>(&text) else { continue };
        let request_id = frame.get("requestId").and_then(|v| v.as_str()).unwrap_or("").to_owned();
        let method = frame.get("method").and_then(|v| v.as_str()).unwrap_or("");
        let path = frame.get("path").and_then(|v| v.as_str()).unwrap_or("").to_owned();
        let data = frame.get("data").cloned().unwrap_or(Value::Null);
        let frame_headers = frame.get("headers").cloned().unwrap_or(json!({}));

        match method {
            "watch" => {
                watches.insert(request_id.clone(), path.clone());
                let rev = {
                    let store = store.lock().unwrap_or_else(|e| e.into_inner());
                    store.resources.get(&path).map(|e| e.rev).unwrap_or(0)
                };
                let response = json!({
                    "requestId": request_id,
                    "status": 200,
                    "statusText": "OK",
                    "headers": {"x-oada-rev": rev.to_string()},
                    "data": Value::Null,
                });
                let _ = sink.send(Message::Text(response.to_string().into())).await;
            }
            "unwatch" => {
                watches.remove(&request_id);
                let response = json!({
                    "requestId": request_id,
                    "status": 200,
                    "statusText": "OK",
                    "headers": {},
                    "data": Value::Null,
                });
                let _ = sink.send(Message::Text(response.to_string().into())).await;
            }
            "put" => {
                let rev = {
                    let mut store = store.lock().unwrap_or_else(|e| e.into_inner());
                    let existed = store.resources.contains_key(&path);
                    let entry = store.resources.entry(path.clone()).or_insert_with(Entry::default);
                    merge(&mut entry.body, &data);
                    if existed {
                        entry.rev += 1;
                    }
                    entry.rev
                };
                let response = json!({
                    "requestId": request_id,
                    "status": 200,
                    "statusText": "OK",
                    "headers": {"x-oada-rev": rev.to_string(), "content-location": path},
                    "data": Value::Null,
                });
                let _ = sink.send(Message::Text(response.to_string().into())).await;

                let body_with_rev = {
                    let store = store.lock().unwrap_or_else(|e| e.into_inner());
                    let mut body = store.resources.get(&path).map(|e| e.body.clone()).unwrap_or(Value::Null);
                    if let Some(obj) = body.as_object_mut() {
                        obj.insert("_rev".to_owned(), json!(rev));
                    }
                    body
                };
                for (watch_request_id, watched_path) in &watches {
                    if !path.starts_with(watched_path.as_str()) {
                        continue;
                    }
                    let leftover = path.strip_prefix(watched_path.as_str()).unwrap_or("").to_owned();
                    let change = json!({
                        "requestId": watch_request_id,
                        "resourceId": watched_path,
                        "path_leftover": leftover,
                        "change": [{
                            "type": "merge",
                            "path": leftover,
                            "resource_id": watched_path,
                            "body": body_with_rev,
                        }],
                    });
                    let _ = sink.send(Message::Text(change.to_string().into())).await;
                }
            }
            "get" | "head" => {
                let store = store.lock().unwrap_or_else(|e| e.into_inner());
                match store.resources.get(&path) {
                    Some(entry) => {
                        let mut body = entry.body.clone();
                        if let Some(obj) = body.as_object_mut() {
                            obj.insert("_rev".to_owned(), json!(entry.rev));
                        }
                        let response = json!({
                            "requestId": request_id,
                            "status": 200,
                            "statusText": "OK",
                            "headers": {"x-oada-rev": entry.rev.to_string()},
                            "data": if method == "head" { Value::Null } else { body },
                        });
                        let _ = sink.send(Message::Text(response.to_string().into())).await;
                    }
                    None => {
                        let response = json!({
                            "requestId": request_id,
                            "status": 404,
                            "statusText": "Not Found",
                            "headers": {},
                            "data": Value::Null,
                        });
                        let _ = sink.send(Message::Text(response.to_string().into())).await;
                    }
                }
            }
            _ => {
                let _ = frame_headers;
                let response = json!({
                    "requestId": request_id,
                    "status": 501,
                    "statusText": "Not Implemented",
                    "headers": {},
                    "data": Value::Null,
                });
                let _ = sink.send(Message::Text(response.to_string().into())).await;
            }
        }
    }
}
