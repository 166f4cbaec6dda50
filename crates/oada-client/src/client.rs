// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client facade (C5): typed GET/PUT/POST/HEAD/DELETE/WATCH/UNWATCH over
//! whichever transport the selector negotiated, with header composition
//! and content-type resolution.

use std::collections::HashMap;
use std::sync::{Arc, Once};
use std::time::Duration;

use crate::config::ClientConfig;
use crate::error::Error;
use crate::model::Path;
use crate::tree::TreeNode;
use crate::transport::{ConnectionRequest, ConnectionResponse, Method, Selector, Transport};
use crate::treeput;
use crate::watch::{ChangeSequence, PersistOptions, WatchManager};

/// A normalized response: status, headers, and parsed JSON body.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub data: Option<serde_json::Value>,
}

impl Response {
    pub(crate) fn from_connection(resp: ConnectionResponse) -> Response {
        Response { status: resp.status, headers: resp.headers, data: resp.data }
    }

    pub fn content_location(&self) -> Option<&str> {
        self.headers.get("content-location").map(String::as_str)
    }

    pub fn rev(&self) -> Option<u64> {
        self.headers.get("x-oada-rev").and_then(|v| v.parse().ok())
    }
}

#[derive(Debug, Default)]
pub struct GetRequest {
    pub tree: Option<TreeNode>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct PutRequest {
    pub content_type: Option<String>,
    pub rev_if_match: Option<u64>,
    pub tree: Option<TreeNode>,
}

#[derive(Debug, Default)]
pub struct PostRequest {
    pub content_type: Option<String>,
    pub tree: Option<TreeNode>,
}

#[derive(Debug, Default)]
pub struct WatchRequest {
    pub rev: Option<u64>,
    pub persist: Option<PersistOptions>,
    pub timeout: Option<Duration>,
    /// When true, changes are delivered as an assembled document
    /// ([`crate::watch::ChangeDelivery::Tree`]) rather than one callback
    /// per individual change (§4.7).
    pub assemble_tree: bool,
}

/// Resolve the content-type for a write: explicit argument → `data._type`
/// → `tree[path]._type` → `application/json` (§4.5).
pub(crate) fn resolve_content_type(
    explicit: Option<&str>,
    data: &serde_json::Value,
    tree_node: Option<&TreeNode>,
) -> String {
    explicit
        .map(str::to_owned)
        .or_else(|| data.get("_type").and_then(|v| v.as_str()).map(str::to_owned))
        .or_else(|| tree_node.and_then(|n| n.resource_type.clone()))
        .unwrap_or_else(|| "application/json".to_owned())
}

/// The top-level client. Cheap to clone; all state is shared behind the
/// transport and the watch manager.
#[derive(Clone)]
pub struct Client {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    watches: Arc<WatchManager>,
}

static CRYPTO_PROVIDER: Once = Once::new();

/// Install the rustls crypto provider once per process. `reqwest` is built
/// with `rustls-no-provider`, which defers this to the consumer; skipping it
/// panics the first real TLS handshake.
fn ensure_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

impl Client {
    /// Negotiate a transport for `config` and connect.
    pub async fn connect(config: ClientConfig) -> Result<Client, Error> {
        ensure_crypto_provider();
        let transport = Selector::select(&config).await?;
        let watches = Arc::new(WatchManager::new(transport.clone(), config.clone()));
        Ok(Client { config, transport, watches })
    }

    fn authed_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("authorization".to_owned(), format!("Bearer {}", self.config.token));
        headers
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Low-level request used by the tree-PUT engine and the facade
    /// methods below; not part of the public surface.
    pub(crate) async fn raw(
        &self,
        method: Method,
        path: &Path,
        data: Option<serde_json::Value>,
        extra_headers: HashMap<String, String>,
        timeout: Option<Duration>,
    ) -> Result<Response, Error> {
        let mut headers = self.authed_headers();
        headers.extend(extra_headers);
        let mut req = ConnectionRequest::new(method, path.to_wire());
        req.headers = headers;
        req.data = data;
        let resp = self.transport.request(req, timeout).await?;
        Ok(Response::from_connection(resp))
    }

    pub async fn head(&self, path: impl Into<Path>) -> Result<Response, Error> {
        self.raw(Method::Head, &path.into(), None, HashMap::new(), None).await
    }

    pub async fn delete(&self, path: impl Into<Path>) -> Result<Response, Error> {
        self.raw(Method::Delete, &path.into(), None, HashMap::new(), None).await
    }

    pub async fn get(&self, path: impl Into<Path>, req: GetRequest) -> Result<Response, Error> {
        let path = path.into();
        let response = self.raw(Method::Get, &path, None, HashMap::new(), req.timeout).await?;
        match req.tree {
            Some(tree) => {
                let root = response.data.clone().unwrap_or(serde_json::Value::Null);
                let assembled = treeput::recursive_get(self, &path, &tree, root, req.timeout).await?;
                Ok(Response { data: Some(assembled), ..response })
            }
            None => Ok(response),
        }
    }

    pub async fn put(
        &self,
        path: impl Into<Path>,
        data: serde_json::Value,
        req: PutRequest,
    ) -> Result<Response, Error> {
        let path = path.into();
        match &req.tree {
            Some(tree) => treeput::tree_put(self, &path, data, req.content_type.as_deref(), tree).await,
            None => {
                let content_type = resolve_content_type(req.content_type.as_deref(), &data, None);
                let mut headers = HashMap::new();
                headers.insert("content-type".to_owned(), content_type);
                if let Some(rev) = req.rev_if_match {
                    headers.insert("if-match".to_owned(), rev.to_string());
                }
                self.raw(Method::Put, &path, Some(data), headers, None).await
            }
        }
    }

    /// `post(path, data)` assigns a fresh key under `path` server-side.
    /// When `tree` is given, per §4.5 this is implemented as a tree-PUT
    /// to `path/<fresh-id>`.
    pub async fn post(
        &self,
        path: impl Into<Path>,
        data: serde_json::Value,
        req: PostRequest,
    ) -> Result<Response, Error> {
        let path = path.into();
        match &req.tree {
            Some(tree) => {
                let fresh = format!("{}/{}", path, uuid::Uuid::new_v4());
                treeput::tree_put(self, &Path::parse(&fresh), data, req.content_type.as_deref(), tree).await
            }
            None => {
                let content_type = resolve_content_type(req.content_type.as_deref(), &data, None);
                let mut headers = HashMap::new();
                headers.insert("content-type".to_owned(), content_type);
                self.raw(Method::Post, &path, Some(data), headers, None).await
            }
        }
    }

    pub async fn watch(
        &self,
        path: impl Into<Path>,
        req: WatchRequest,
    ) -> Result<(Response, ChangeSequence), Error> {
        self.watches.watch(path.into(), req).await
    }

    pub async fn unwatch(&self, id: &str) -> Result<(), Error> {
        self.watches.unwatch(id).await
    }

    /// Tear down the transport and settle all outstanding requests (§5
    /// Cancellation).
    pub async fn disconnect(&self) {
        self.watches.close_all().await;
        self.transport.disconnect().await;
    }
}
