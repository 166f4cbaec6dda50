// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tree-aware recursive PUT/GET (C6): walk a user-supplied schema tree to
//! materialize missing resource boundaries with conditional writes, and
//! to assemble a subtree document out of nested GETs.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;

use crate::client::{resolve_content_type, Client, Response};
use crate::error::Error;
use crate::model::{Link, Path};
use crate::transport::Method;
use crate::tree::TreeNode;

/// Tree-PUT exhausts its If-Match retry budget after this many attempts
/// (§4.6, §8).
const MAX_IF_MATCH_RETRIES: u32 = 5;

/// `HEAD /path`. `Ok(Some(rev))` if the resource exists (`rev` from
/// `x-oada-rev`, defaulting to 0 if absent); `Ok(None)` if it does not —
/// a plain 404, or a 403 under `/resources/*`, which the server uses to
/// hide existence (§4.6).
async fn head_exists(client: &Client, path: &Path) -> Result<Option<u64>, Error> {
    match client.head(path.clone()).await {
        Ok(resp) => Ok(Some(resp.rev().unwrap_or(0))),
        Err(Error::NotFound) => Ok(None),
        Err(Error::Unauthorized { status: 403 }) if path.segments().first().map(String::as_str) == Some("resources") => {
            Ok(None)
        }
        Err(other) => Err(other),
    }
}

/// `PUT /resources/<fresh-id>`; returns the new resource's `_id`.
/// `/resources` itself is treated as always existing.
async fn create_resource(
    client: &Client,
    content_type: &str,
    body: serde_json::Value,
) -> Result<String, Error> {
    let id = format!("resources/{}", uuid::Uuid::new_v4());
    let path = Path::parse(&format!("/{id}"));
    let mut headers = HashMap::new();
    headers.insert("content-type".to_owned(), content_type.to_owned());
    client.raw(Method::Put, &path, Some(body), headers, None).await?;
    tracing::debug!(id = %id, content_type, "created resource");
    Ok(id)
}

fn backoff_with_jitter(retries: u32) -> Duration {
    let base_ms = 1000.0 * (retries as f64).powi(2);
    let jitter_ms: f64 = rand::rng().random_range(0.0..1000.0);
    Duration::from_millis((base_ms + jitter_ms) as u64)
}

/// Ensure every resource-boundary prefix of `path` exists, linked from
/// its nearest ancestor, then PUT `data` at `path` itself.
pub(crate) async fn tree_put(
    client: &Client,
    path: &Path,
    data: serde_json::Value,
    content_type: Option<&str>,
    tree: &TreeNode,
) -> Result<Response, Error> {
    let n = path.segments().len();
    let mut retries = 0u32;

    'attempt: loop {
        let walked = tree.walk(path);
        let mut link: Option<Link> = None;
        let mut new_path_len: usize = 0;

        let mut i = n;
        while i >= 1 {
            let Some(node) = walked[i - 1] else {
                i -= 1;
                continue;
            };
            if node.is_boundary() {
                let prefix = path.prefix(i);
                match head_exists(client, &prefix).await? {
                    Some(rev) => {
                        if let Some(ref link) = link {
                            if new_path_len > i {
                                let rel = path.prefix(new_path_len).suffix(i);
                                let body = link.nest(&rel);
                                let mut headers = HashMap::new();
                                headers.insert("if-match".to_owned(), rev.to_string());
                                match client.raw(Method::Put, &prefix, Some(body), headers, None).await {
                                    Ok(_) => {}
                                    Err(Error::PreconditionFailed) => {
                                        if retries >= MAX_IF_MATCH_RETRIES {
                                            return Err(Error::IfMatchExhausted { attempts: retries });
                                        }
                                        let wait = backoff_with_jitter(retries);
                                        tracing::warn!(retries, wait_ms = wait.as_millis(), "tree-put If-Match conflict, retrying");
                                        tokio::time::sleep(wait).await;
                                        retries += 1;
                                        continue 'attempt;
                                    }
                                    Err(other) => return Err(other),
                                }
                            }
                        }
                        break;
                    }
                    None => {
                        let rel = if link.is_some() && new_path_len > i {
                            path.prefix(new_path_len).suffix(i)
                        } else {
                            Path::parse("")
                        };
                        let new_resource = match &link {
                            Some(link) => link.nest(&rel),
                            None => serde_json::json!({}),
                        };
                        let resource_content_type =
                            node.resource_type.clone().unwrap_or_else(|| "application/json".to_owned());
                        let id = create_resource(client, &resource_content_type, new_resource).await?;
                        link = Some(if node.versioned { Link::versioned(id) } else { Link::non_versioned(id) });
                        new_path_len = i;
                    }
                }
            }
            i -= 1;
        }

        let leaf_node = walked.last().copied().flatten();
        let resolved_content_type = resolve_content_type(content_type, &data, leaf_node);
        let mut headers = HashMap::new();
        headers.insert("content-type".to_owned(), resolved_content_type);
        return client.raw(Method::Put, path, Some(data), headers, None).await;
    }
}

/// Given a root document already fetched at `path`, recursively GET the
/// subtree `tree` describes, replacing each object-valued key the tree
/// names with its fully assembled subtree.
pub(crate) async fn recursive_get(
    client: &Client,
    path: &Path,
    tree: &TreeNode,
    document: serde_json::Value,
    timeout: Option<Duration>,
) -> Result<serde_json::Value, Error> {
    if tree.children.is_empty() {
        return Ok(document);
    }

    let serde_json::Value::Object(mut obj) = document else {
        return Err(Error::PathMismatch { path: path.to_wire() });
    };

    let wildcard = tree.children.get(crate::tree::WILDCARD);
    let mut targets: Vec<(String, &TreeNode)> = Vec::new();
    for (key, child) in &tree.children {
        if key == crate::tree::WILDCARD {
            continue;
        }
        targets.push((key.clone(), child));
    }
    if let Some(wildcard_node) = wildcard {
        for (key, value) in obj.iter() {
            if tree.children.contains_key(key) {
                continue;
            }
            if value.is_object() {
                targets.push((key.clone(), wildcard_node));
            }
        }
    }

    for (key, child_tree) in targets {
        let Some(value) = obj.get(&key) else { continue };
        if !value.is_object() {
            if child_tree.is_boundary() || !child_tree.children.is_empty() {
                let child_path = Path::parse(&format!("{path}/{key}"));
                return Err(Error::PathMismatch { path: child_path.to_wire() });
            }
            continue;
        }

        let child_path = Path::parse(&format!("{path}/{key}"));
        let fetched = client.raw(Method::Get, &child_path, None, HashMap::new(), timeout).await?;
        let child_document = fetched.data.unwrap_or(serde_json::Value::Null);
        let resolved = Box::pin(recursive_get(client, &child_path, child_tree, child_document, timeout)).await?;
        obj.insert(key, resolved);
    }

    Ok(serde_json::Value::Object(obj))
}

#[cfg(test)]
#[path = "treeput_tests.rs"]
mod tests;
