// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded-concurrency request queue and the rate-limit/reset recovery
//! policy (§4.4). A transport submits each outbound request through a
//! [`RequestQueue`], which serializes admission to at most `concurrency`
//! in-flight operations and retries the recoverable error classes
//! transparently, so callers only ever see a terminal success or a
//! non-recoverable [`Error`].

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::{Error, CONNECTION_RESET_WAIT};

/// Serializes submission of requests onto a transport, bounding how many
/// are in flight at once and retrying recoverable failures.
#[derive(Clone)]
pub struct RequestQueue {
    slots: Arc<Semaphore>,
}

impl RequestQueue {
    /// `concurrency` is floored at 1 (a queue that admits nothing can
    /// never make progress).
    pub fn new(concurrency: usize) -> RequestQueue {
        RequestQueue { slots: Arc::new(Semaphore::new(concurrency.max(1))) }
    }

    /// Submit one logical request. `op` is invoked at least once; on a
    /// recoverable error (rate limit, connection reset) it sleeps for the
    /// mandated wait and invokes `op` again, holding the same concurrency
    /// slot across retries so the retry itself respects the bound. Any
    /// other error is returned to the caller immediately.
    pub async fn submit<F, Fut, T>(&self, mut op: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let permit = match self.slots.acquire().await {
            Ok(permit) => permit,
            Err(_) => return Err(Error::ConnectionReset),
        };

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(Error::RateLimited { wait }) => {
                    tracing::warn!(wait_secs = wait.as_secs(), "rate limited, retrying after wait");
                    tokio::time::sleep(wait).await;
                }
                Err(Error::ConnectionReset) => {
                    tracing::warn!(wait_secs = CONNECTION_RESET_WAIT.as_secs(), "connection reset, retrying");
                    tokio::time::sleep(CONNECTION_RESET_WAIT).await;
                }
                Err(other) => {
                    drop(permit);
                    return Err(other);
                }
            }
        }
    }

    /// Number of slots currently free. Exposed for tests that assert the
    /// concurrency bound holds under load.
    pub fn available_permits(&self) -> usize {
        self.slots.available_permits()
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
