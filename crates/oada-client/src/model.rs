// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-level data model: paths, links, and change notifications.

use serde::{Deserialize, Serialize};

/// A slash-delimited path, normalized so leading/trailing empty segments
/// are stripped (`"/bookmarks/foo/"` and `"bookmarks/foo"` are the same
/// path).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    /// Parse a path string, stripping leading/trailing empty segments.
    pub fn parse(raw: &str) -> Path {
        let segments =
            raw.split('/').filter(|s| !s.is_empty()).map(str::to_owned).collect();
        Path { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The path up to and including index `i` (1-based, inclusive), as a
    /// new `Path`. Used by the tree-PUT walk, which inspects each prefix
    /// of the target path from the leaf back to the root.
    pub fn prefix(&self, len: usize) -> Path {
        Path { segments: self.segments[..len.min(self.segments.len())].to_vec() }
    }

    /// The segments after index `len` (exclusive), joined back into a
    /// `Path`. Used to compute the relative path nested under a freshly
    /// created resource boundary.
    pub fn suffix(&self, len: usize) -> Path {
        let start = len.min(self.segments.len());
        Path { segments: self.segments[start..].to_vec() }
    }

    pub fn to_wire(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_wire())
    }
}

impl From<&str> for Path {
    fn from(raw: &str) -> Self {
        Path::parse(raw)
    }
}

impl From<String> for Path {
    fn from(raw: String) -> Self {
        Path::parse(&raw)
    }
}

/// A JSON link to another resource: `{_id}` (non-versioned) or `{_id,
/// _rev}` (versioned).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Link {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<u64>,
}

impl Link {
    pub fn non_versioned(id: impl Into<String>) -> Link {
        Link { id: id.into(), rev: None }
    }

    pub fn versioned(id: impl Into<String>) -> Link {
        Link { id: id.into(), rev: Some(0) }
    }

    /// Nest this link under a relative path, producing the JSON object to
    /// write into the new resource's body at creation time, e.g. nesting
    /// `{_id: "resources/abc"}` under `["a", "b"]` yields
    /// `{"a": {"b": {_id: "resources/abc"}}}`.
    pub fn nest(&self, rel: &Path) -> serde_json::Value {
        let link_value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        rel.segments().iter().rev().fold(link_value, |acc, key| {
            serde_json::json!({ key.clone(): acc })
        })
    }
}

/// A single merge or delete change notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub body: serde_json::Value,
    pub path: String,
    pub resource_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Merge,
    Delete,
}

impl Change {
    /// The `_rev` carried by this change's body, if present.
    pub fn rev(&self) -> Option<u64> {
        self.body.get("_rev").and_then(|v| v.as_u64())
    }
}

/// One server-side change notification: a root change for the watched
/// resource plus zero or more child changes addressing descendants.
#[derive(Debug, Clone)]
pub struct ChangeGroup {
    pub root: Change,
    pub children: Vec<Change>,
}

impl ChangeGroup {
    pub fn rev(&self) -> Option<u64> {
        self.root.rev()
    }
}

/// One WebSocket change frame as received on the wire (§6): a set of
/// request ids the change applies to (normalized from the wire's
/// scalar-or-array `requestId`), the resource it originated from, and
/// the change list itself.
#[derive(Debug, Clone)]
pub struct ChangeFrame {
    pub request_ids: Vec<String>,
    pub resource_id: String,
    pub path_leftover: String,
    pub changes: Vec<Change>,
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
