// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn path_strips_leading_and_trailing_slashes() {
    assert_eq!(Path::parse("/bookmarks/foo/").segments(), ["bookmarks", "foo"]);
    assert_eq!(Path::parse("bookmarks/foo").segments(), ["bookmarks", "foo"]);
}

#[test]
fn path_empty_for_root() {
    assert!(Path::parse("/").is_empty());
    assert!(Path::parse("").is_empty());
}

#[test]
fn path_prefix_and_suffix_partition_segments() {
    let p = Path::parse("/a/b/c/d");
    assert_eq!(p.prefix(2).segments(), ["a", "b"]);
    assert_eq!(p.suffix(2).segments(), ["c", "d"]);
}

#[test]
fn path_to_wire_round_trips() {
    assert_eq!(Path::parse("/bookmarks/foo").to_wire(), "/bookmarks/foo");
}

#[test]
fn link_non_versioned_serializes_without_rev() {
    let link = Link::non_versioned("resources/abc");
    let v = serde_json::to_value(&link).expect("serialize");
    assert_eq!(v, serde_json::json!({"_id": "resources/abc"}));
}

#[test]
fn link_versioned_serializes_with_rev_zero() {
    let link = Link::versioned("resources/abc");
    let v = serde_json::to_value(&link).expect("serialize");
    assert_eq!(v, serde_json::json!({"_id": "resources/abc", "_rev": 0}));
}

#[test]
fn link_nest_wraps_under_relative_path() {
    let link = Link::non_versioned("resources/abc");
    let rel = Path::parse("a/b");
    let nested = link.nest(&rel);
    assert_eq!(nested, serde_json::json!({"a": {"b": {"_id": "resources/abc"}}}));
}

#[test]
fn link_nest_with_empty_relative_path_is_bare_link() {
    let link = Link::non_versioned("resources/abc");
    let nested = link.nest(&Path::parse(""));
    assert_eq!(nested, serde_json::json!({"_id": "resources/abc"}));
}

#[test]
fn change_rev_reads_from_body() {
    let change = Change {
        change_type: ChangeType::Merge,
        body: serde_json::json!({"_rev": 7}),
        path: "/testData1".to_owned(),
        resource_id: "resources/abc".to_owned(),
    };
    assert_eq!(change.rev(), Some(7));
}
