// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Pool worker: the pool's handle on one backend process

use crate::backend::Backend;
use crate::error::BackendError;
use serde_json::Value;
use tracing::instrument;

/// One pool slot's connection to a backend process
///
/// A worker owns its backend exclusively for its lifetime. Concurrent
/// calls on the same worker are a caller contract violation; the pool
/// serializes access by keeping busy workers out of the idle set.
pub struct Worker {
    id: usize,
    backend: Box<dyn Backend>,
}

impl Worker {
    pub fn new(id: usize, backend: Box<dyn Backend>) -> Self {
        Self { id, backend }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Forward a single call and await its reply
    #[instrument(skip(self, params), fields(worker_id = self.id))]
    pub async fn request(&mut self, method: &str, params: Value) -> Result<Value, BackendError> {
        self.backend.request(method, params).await
    }

    /// Tear down the owned backend process
    pub async fn shutdown(mut self) {
        self.backend.shutdown().await;
    }
}
