// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tree schema: the client-side map of which path prefixes are resource
//! boundaries and which links are versioned.

use std::collections::HashMap;

use crate::model::Path;

/// The wildcard key meaning "any child, recursively shaped by this
/// subtree".
pub const WILDCARD: &str = "*";

/// One node of a tree schema. A node with `resource_type: Some(_)` marks
/// that path prefix as a resource boundary; `versioned` controls whether
/// the parent's link to it carries `_rev`.
#[derive(Debug, Clone, Default)]
pub struct TreeNode {
    pub resource_type: Option<String>,
    pub versioned: bool,
    pub children: HashMap<String, TreeNode>,
}

impl TreeNode {
    /// Parse a tree schema from its JSON representation. `_type` and
    /// `_rev` are reserved keys consumed into this node; every other key
    /// (including the wildcard `*`) becomes a child, parsed recursively.
    pub fn parse(value: &serde_json::Value) -> TreeNode {
        let obj = match value.as_object() {
            Some(obj) => obj,
            None => return TreeNode::default(),
        };
        let resource_type =
            obj.get("_type").and_then(|v| v.as_str()).map(str::to_owned);
        let versioned = obj.contains_key("_rev");
        let children = obj
            .iter()
            .filter(|(k, _)| k.as_str() != "_type" && k.as_str() != "_rev")
            .map(|(k, v)| (k.clone(), TreeNode::parse(v)))
            .collect();
        TreeNode { resource_type, versioned, children }
    }

    /// Is this node a resource boundary?
    pub fn is_boundary(&self) -> bool {
        self.resource_type.is_some()
    }

    /// Resolve the child for `key`, falling back to the `*` wildcard
    /// child when no exact key matches.
    pub fn child(&self, key: &str) -> Option<&TreeNode> {
        self.children.get(key).or_else(|| self.children.get(WILDCARD))
    }

    /// Walk `path` from the root of this tree, returning the node at each
    /// prefix length `1..=path.segments().len()`, or `None` at the first
    /// prefix that has no corresponding tree node (exact or wildcard).
    ///
    /// Index `i` in the returned vec corresponds to `path.prefix(i + 1)`.
    pub fn walk<'a>(&'a self, path: &Path) -> Vec<Option<&'a TreeNode>> {
        let mut out = Vec::with_capacity(path.segments().len());
        let mut current = Some(self);
        for segment in path.segments() {
            let next = current.and_then(|n| n.child(segment));
            out.push(next);
            current = next;
        }
        out
    }
}

#[cfg(test)]
#[path = "tree_tests.rs"]
mod tests;
