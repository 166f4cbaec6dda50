// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A client library for an OADA-compliant HTTP/JSON resource server.
//!
//! [`Client`] negotiates HTTP/2 or WebSocket transport via ALPN, executes
//! typed GET/PUT/POST/HEAD/DELETE requests, and maintains long-lived
//! watches that stream change feeds. [`client::PutRequest`] and
//! [`client::GetRequest`] accept a [`tree::TreeNode`] schema to drive the
//! recursive tree-PUT/GET algorithm that materializes and traverses
//! resource boundaries on the caller's behalf.

pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod queue;
pub mod transport;
pub mod tree;
mod treeput;
pub mod watch;

pub use client::{Client, GetRequest, PostRequest, PutRequest, Response, WatchRequest};
pub use config::{ClientConfig, ConnectionMode, Timeouts};
pub use error::Error;
pub use model::{Change, ChangeType, Link, Path};
pub use tree::TreeNode;
pub use watch::{ChangeDelivery, ChangeSequence, PersistOptions};
