// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;

use super::TreeNode;
use crate::model::Path;

fn sample_tree() -> TreeNode {
    TreeNode::parse(&json!({
        "bookmarks": {
            "_type": "application/json",
            "_rev": 0,
            "T": {
                "aaa": {
                    "_type": "application/vnd.oada.test.1+json",
                    "_rev": 0,
                    "bbb": {
                        "_type": "application/vnd.oada.test.1+json",
                        "_rev": 0,
                        "index-one": {
                            "*": {
                                "_type": "application/vnd.oada.test.1+json",
                                "_rev": 0
                            }
                        }
                    }
                }
            }
        }
    }))
}

#[test]
fn parse_extracts_type_and_versioned() {
    let tree = sample_tree();
    let bookmarks = tree.children.get("bookmarks").expect("bookmarks node");
    assert_eq!(bookmarks.resource_type.as_deref(), Some("application/json"));
    assert!(bookmarks.versioned);
}

#[test]
fn parse_plain_subkey_is_not_a_boundary() {
    let tree = sample_tree();
    let index_one = tree
        .children
        .get("bookmarks")
        .and_then(|n| n.children.get("T"))
        .and_then(|n| n.children.get("aaa"))
        .and_then(|n| n.children.get("bbb"))
        .and_then(|n| n.children.get("index-one"))
        .expect("index-one node");
    assert!(!index_one.is_boundary());
}

#[test]
fn child_falls_back_to_wildcard() {
    let tree = sample_tree();
    let index_one = tree
        .children
        .get("bookmarks")
        .and_then(|n| n.children.get("T"))
        .and_then(|n| n.children.get("aaa"))
        .and_then(|n| n.children.get("bbb"))
        .and_then(|n| n.children.get("index-one"))
        .expect("index-one node");

    let ccc = index_one.child("ccc").expect("wildcard match");
    assert!(ccc.is_boundary());
    // Any key should match the wildcard identically.
    let other = index_one.child("anything-else").expect("wildcard match");
    assert!(other.is_boundary());
}

#[test]
fn walk_returns_node_per_prefix_and_none_past_schema_edge() {
    let tree = sample_tree();
    let path = Path::parse("/bookmarks/T/aaa/bbb/index-one/ccc/not-in-schema");
    let walked = tree.walk(&path);
    assert_eq!(walked.len(), 7);
    assert!(walked[0].is_some()); // bookmarks
    assert!(walked[4].is_some()); // index-one
    assert!(walked[5].is_some()); // ccc, via wildcard
    assert!(walked[6].is_none()); // index-one has no further children
}
