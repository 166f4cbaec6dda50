// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Watch Manager (C7): the watch registry, reconnect re-subscription via
//! a renewal map, persisted-rev checkpointing, and change-tree assembly.
//! Watches are exposed to the application as a lazy pull-based sequence
//! of changes (§9), never by invoking application code from the
//! network-reading task directly.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::config::ClientConfig;
use crate::error::Error;
use crate::model::{Change, ChangeFrame, Path};
use crate::transport::{ConnectionRequest, Method, Transport};

/// Options for a persisted-resume watch (§4.7).
#[derive(Debug, Clone)]
pub struct PersistOptions {
    pub name: String,
}

/// One item delivered on a [`ChangeSequence`]: either a single change
/// (default) or, when the watch requested tree assembly, a document
/// assembled from a root change and its descendants.
#[derive(Debug, Clone)]
pub enum ChangeDelivery {
    Single(Change),
    Tree { document: serde_json::Value, changes: Vec<Change> },
}

impl ChangeDelivery {
    /// The revision carried by this delivery's root change, used for
    /// persist checkpointing.
    pub fn rev(&self) -> Option<u64> {
        match self {
            ChangeDelivery::Single(change) => change.rev(),
            ChangeDelivery::Tree { changes, .. } => changes.first().and_then(Change::rev),
        }
    }
}

/// A one-to-one map from the server's current request id for a watch to
/// the application-visible original id, refreshed atomically on every
/// reconnect (§4.7, §9).
#[derive(Debug, Default)]
pub struct RenewalMap {
    current_to_original: HashMap<String, String>,
}

impl RenewalMap {
    pub fn new() -> RenewalMap {
        RenewalMap::default()
    }

    /// Replace `old_current`'s entry with `new_current`, preserving the
    /// original id it resolves to.
    pub fn renew(&mut self, old_current: &str, new_current: &str) {
        if let Some(original) = self.current_to_original.remove(old_current) {
            self.current_to_original.insert(new_current.to_owned(), original);
        }
    }

    pub fn insert(&mut self, current: String, original: String) {
        self.current_to_original.insert(current, original);
    }

    pub fn remove_by_current(&mut self, current: &str) -> Option<String> {
        self.current_to_original.remove(current)
    }

    /// Resolve the original id for the server's current request id,
    /// e.g. to route an incoming change frame to the right watch record.
    pub fn original_of(&self, current: &str) -> Option<&str> {
        self.current_to_original.get(current).map(String::as_str)
    }
}

struct PersistRuntime {
    path: Path,
    name: String,
    last_rev: u64,
    pending: BTreeSet<u64>,
}

struct WatchRecord {
    current_id: String,
    path: Path,
    rev: Option<u64>,
    tree: bool,
    persist: Option<PersistRuntime>,
    tx: mpsc::UnboundedSender<Result<ChangeDelivery, Error>>,
}

struct ManagerState {
    watches: HashMap<String, WatchRecord>,
    renewal: RenewalMap,
}

/// Owns every active watch for one client connection.
pub struct WatchManager {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    state: Arc<Mutex<ManagerState>>,
    resubscribe_task_started: AtomicBool,
}

impl WatchManager {
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> WatchManager {
        let state = Arc::new(Mutex::new(ManagerState { watches: HashMap::new(), renewal: RenewalMap::new() }));
        WatchManager { transport, config, state, resubscribe_task_started: AtomicBool::new(false) }
    }

    /// Lazily wires up reconnect-driven re-subscription the first time
    /// it is possible to: an HTTP/2 transport has no socket to watch for
    /// "open" events until its WebSocket sidecar is created by the first
    /// `watch` call.
    fn ensure_resubscribe_task(&self) {
        if self.resubscribe_task_started.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.transport.subscribe_open() {
            Some(rx) => {
                spawn_resubscribe_task(rx, self.transport.clone(), self.config.clone(), self.state.clone());
            }
            None => self.resubscribe_task_started.store(false, Ordering::SeqCst),
        }
    }

    fn auth_header(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("authorization".to_owned(), format!("Bearer {}", self.config.token));
        headers
    }

    async fn read(&self, path: &str) -> Result<Option<serde_json::Value>, Error> {
        let req = ConnectionRequest::new(Method::Get, path.to_owned());
        let req = ConnectionRequest { headers: self.auth_header(), ..req };
        match self.transport.request(req, None).await {
            Ok(resp) => Ok(resp.data),
            Err(Error::NotFound) => Ok(None),
            Err(other) => Err(other),
        }
    }

    async fn put(&self, path: &str, body: serde_json::Value) -> Result<(), Error> {
        let mut headers = self.auth_header();
        headers.insert("content-type".to_owned(), "application/json".to_owned());
        let req = ConnectionRequest { data: Some(body), headers, ..ConnectionRequest::new(Method::Put, path.to_owned()) };
        self.transport.request(req, None).await?;
        Ok(())
    }

    /// Implements §4.7's persist setup: resume from a stored checkpoint
    /// if one exists, else start live and create one.
    async fn setup_persist(&self, path: &Path, name: &str) -> Result<(Option<u64>, PersistRuntime), Error> {
        let persist_path = format!("{path}/_meta/watchPersists/{name}");
        if let Some(existing) = self.read(&persist_path).await? {
            let rev = existing.get("rev").and_then(|v| v.as_u64()).unwrap_or(0);
            tracing::debug!(%persist_path, rev, "resuming watch from persisted checkpoint");
            return Ok((
                Some(rev),
                PersistRuntime { path: path.clone(), name: name.to_owned(), last_rev: rev, pending: BTreeSet::new() },
            ));
        }

        let meta = self.read(&format!("{path}/_meta")).await?.unwrap_or(serde_json::Value::Null);
        let current_rev = meta.get("_rev").and_then(|v| v.as_u64()).unwrap_or(0);
        let id = format!("resources/{}", uuid::Uuid::new_v4());
        self.put(&format!("/{id}"), serde_json::json!({ "rev": current_rev })).await?;
        self.put(&persist_path, serde_json::json!({ "_id": id })).await?;
        tracing::debug!(%persist_path, current_rev, "created new watch persist checkpoint");
        Ok((
            None,
            PersistRuntime { path: path.clone(), name: name.to_owned(), last_rev: current_rev, pending: BTreeSet::new() },
        ))
    }

    /// Subscribe to `path`, returning the initial response and a lazy
    /// sequence of subsequent changes.
    pub async fn watch(
        self: &Arc<Self>,
        path: Path,
        req: crate::client::WatchRequest,
    ) -> Result<(crate::client::Response, ChangeSequence), Error> {
        let original_id = uuid::Uuid::new_v4().to_string();
        let (resume_rev, persist) = match &req.persist {
            Some(opts) => {
                let (rev, runtime) = self.setup_persist(&path, &opts.name).await?;
                (rev.or(req.rev), Some(runtime))
            }
            None => (req.rev, None),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.watches.insert(
                original_id.clone(),
                WatchRecord {
                    current_id: original_id.clone(),
                    path: path.clone(),
                    rev: resume_rev,
                    tree: req.assemble_tree,
                    persist,
                    tx,
                },
            );
            state.renewal.insert(original_id.clone(), original_id.clone());
        }

        let response = self.issue_watch(&path, resume_rev, original_id.clone()).await?;
        self.ensure_resubscribe_task();

        Ok((
            response,
            ChangeSequence { rx, manager: self.clone(), original_id, closed: false },
        ))
    }

    /// Send the wire `watch` request and wire the transport callback to
    /// forward change frames into the watch's channel.
    async fn issue_watch(
        &self,
        path: &Path,
        resume_rev: Option<u64>,
        current_id: String,
    ) -> Result<crate::client::Response, Error> {
        let mut headers = self.auth_header();
        if let Some(rev) = resume_rev {
            headers.insert("x-oada-rev".to_owned(), rev.to_string());
        }
        let req = ConnectionRequest { headers, request_id: Some(current_id.clone()), ..ConnectionRequest::new(Method::Watch, path.to_wire()) };

        let state = self.state.clone();
        let callback: crate::transport::WatchCallback = Arc::new(move |frame: ChangeFrame| {
            dispatch_to_watch(&state, frame);
        });

        let resp = self.transport.watch(req, None, callback).await?;
        Ok(crate::client::Response::from_connection(resp))
    }

    /// Called by [`ChangeSequence`] after the application has finished
    /// processing a delivered change, advancing the persisted checkpoint
    /// contiguously (§4.7, §8).
    async fn mark_processed(&self, original_id: &str, rev: Option<u64>) {
        let Some(rev) = rev else { return };
        let advance = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let Some(record) = state.watches.get_mut(original_id) else { return };
            let Some(persist) = &mut record.persist else { return };
            persist.pending.insert(rev);
            let mut last = persist.last_rev;
            while persist.pending.remove(&(last + 1)) {
                last += 1;
            }
            let advanced = last != persist.last_rev;
            persist.last_rev = last;
            advanced.then(|| (persist.path.clone(), persist.name.clone(), last))
        };
        if let Some((path, name, rev)) = advance {
            let rev_path = format!("{path}/_meta/watchPersists/{name}/rev");
            if let Err(err) = self.put(&rev_path, serde_json::json!(rev)).await {
                tracing::warn!(error = %err, %rev_path, "failed to persist watch checkpoint");
            } else {
                tracing::debug!(%rev_path, rev, "advanced watch persist checkpoint");
            }
        }
    }

    pub async fn unwatch(&self, original_id: &str) -> Result<(), Error> {
        let current_id = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let Some(record) = state.watches.remove(original_id) else {
                return Err(Error::Unsupported(format!("unknown watch id {original_id}")));
            };
            state.renewal.remove_by_current(&record.current_id);
            record.current_id
        };
        self.transport.unwatch(&current_id).await
    }

    pub async fn close_all(&self) {
        let ids: Vec<String> = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.watches.keys().cloned().collect()
        };
        for id in ids {
            let _ = self.unwatch(&id).await;
        }
    }
}

fn dispatch_to_watch(state: &Arc<Mutex<ManagerState>>, frame: ChangeFrame) {
    let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
    let ManagerState { watches, renewal } = &mut *state;
    for current_id in &frame.request_ids {
        let Some(original_id) = renewal.original_of(current_id).map(str::to_owned) else { continue };
        let Some(record) = watches.get_mut(&original_id) else { continue };
        let delivery = if record.tree {
            let (root, children) = match frame.changes.split_first() {
                Some((root, rest)) => (root.clone(), rest.to_vec()),
                None => continue,
            };
            let document = assemble_tree_change(&root, &children);
            ChangeDelivery::Tree { document, changes: frame.changes.clone() }
        } else {
            match frame.changes.first() {
                Some(change) => ChangeDelivery::Single(change.clone()),
                None => continue,
            }
        };
        if let Some(rev) = delivery.rev() {
            record.rev = Some(rev);
        }
        let _ = record.tx.send(Ok(delivery));
    }
}

/// Assemble a root change and its descendants into one document (§4.7):
/// non-delete bodies deep-merge in; delete bodies translate `null`
/// leaves into absent keys.
fn assemble_tree_change(root: &Change, children: &[Change]) -> serde_json::Value {
    let mut document = root.body.clone();
    for child in children {
        apply_change_at_path(&mut document, &child.path, child);
    }
    document
}

fn apply_change_at_path(document: &mut serde_json::Value, path: &str, change: &Change) {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let mut cursor = document;
    for segment in &segments {
        if !cursor.is_object() {
            *cursor = serde_json::json!({});
        }
        let obj = cursor.as_object_mut().expect("just coerced to object above");
        cursor = obj.entry(segment.to_string()).or_insert(serde_json::json!({}));
    }
    merge_change_body(cursor, &change.body, matches!(change.change_type, crate::model::ChangeType::Delete));
}

fn merge_change_body(target: &mut serde_json::Value, incoming: &serde_json::Value, is_delete: bool) {
    match incoming {
        serde_json::Value::Object(incoming_obj) => {
            if !target.is_object() {
                *target = serde_json::json!({});
            }
            let target_obj = target.as_object_mut().expect("just coerced to object above");
            for (key, value) in incoming_obj {
                if is_delete && value.is_null() {
                    target_obj.remove(key);
                } else {
                    let slot = target_obj.entry(key.clone()).or_insert(serde_json::Value::Null);
                    merge_change_body(slot, value, is_delete);
                }
            }
        }
        other => {
            *target = other.clone();
        }
    }
}

fn spawn_resubscribe_task(
    mut open_rx: tokio::sync::broadcast::Receiver<()>,
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    state: Arc<Mutex<ManagerState>>,
) {
    tokio::spawn(async move {
        let mut first = true;
        loop {
            match open_rx.recv().await {
                Ok(()) => {
                    if first {
                        first = false;
                        continue;
                    }
                    resubscribe_all(&transport, &config, &state).await;
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    });
}

async fn resubscribe_all(transport: &Arc<dyn Transport>, config: &ClientConfig, state: &Arc<Mutex<ManagerState>>) {
    let snapshot: Vec<(String, Path, Option<u64>)> = {
        let state = state.lock().unwrap_or_else(|e| e.into_inner());
        state.watches.iter().map(|(id, record)| (id.clone(), record.path.clone(), record.rev)).collect()
    };

    for (original_id, path, rev) in snapshot {
        let new_current_id = uuid::Uuid::new_v4().to_string();
        let mut headers = HashMap::new();
        headers.insert("authorization".to_owned(), format!("Bearer {}", config.token));
        if let Some(rev) = rev {
            headers.insert("x-oada-rev".to_owned(), rev.to_string());
        }
        let req = ConnectionRequest {
            headers,
            request_id: Some(new_current_id.clone()),
            ..ConnectionRequest::new(Method::Watch, path.to_wire())
        };

        let cb_state = state.clone();
        let callback: crate::transport::WatchCallback = Arc::new(move |frame: ChangeFrame| {
            dispatch_to_watch(&cb_state, frame);
        });

        match transport.watch(req, None, callback).await {
            Ok(_) => {
                let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(record) = state.watches.get_mut(&original_id) {
                    let old_current = record.current_id.clone();
                    record.current_id = new_current_id.clone();
                    state.renewal.renew(&old_current, &new_current_id);
                }
                tracing::debug!(%original_id, "resubscribed watch after reconnect");
            }
            Err(err) => {
                tracing::warn!(%original_id, error = %err, "failed to resubscribe watch after reconnect");
            }
        }
    }
}

/// A lazy, pull-based sequence of changes for one watch (§9). Dropping it
/// without calling [`ChangeSequence::close`] still issues `unwatch`
/// (spawned in the background), matching "closing the sequence" in §5.
pub struct ChangeSequence {
    rx: mpsc::UnboundedReceiver<Result<ChangeDelivery, Error>>,
    manager: Arc<WatchManager>,
    original_id: String,
    closed: bool,
}

impl ChangeSequence {
    /// The application-visible watch id, suitable for [`Client::unwatch`]
    /// (§4.5's `unwatch(id)`, `id` being "from a prior watch").
    ///
    /// [`Client::unwatch`]: crate::client::Client::unwatch
    pub fn id(&self) -> &str {
        &self.original_id
    }

    /// Pull the next change, or `None` once the watch is closed.
    pub async fn next(&mut self) -> Option<Result<ChangeDelivery, Error>> {
        self.rx.recv().await
    }

    /// Acknowledge that the application finished processing `delivery`,
    /// advancing the persisted checkpoint if this watch requested one.
    pub async fn ack(&self, delivery: &ChangeDelivery) {
        self.manager.mark_processed(&self.original_id, delivery.rev()).await;
    }

    /// Explicitly unwatch and stop delivery.
    pub async fn close(mut self) -> Result<(), Error> {
        self.closed = true;
        self.manager.unwatch(&self.original_id).await
    }
}

impl Drop for ChangeSequence {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let manager = self.manager.clone();
        let original_id = self.original_id.clone();
        tokio::spawn(async move {
            let _ = manager.unwatch(&original_id).await;
        });
    }
}

#[cfg(test)]
#[path = "watch_tests.rs"]
mod tests;
