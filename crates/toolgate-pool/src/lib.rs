// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Backend worker pool for Toolgate
//!
//! A fixed set of long-lived tool-server child processes is multiplexed
//! behind [`WorkerPool::dispatch`]. Each worker owns exactly one backend
//! process and carries at most one in-flight call; callers that find the
//! pool saturated wait in FIFO order with a bounded timeout. A worker
//! whose process dies mid-call is replaced (new process, same worker id)
//! before its slot rejoins the idle set.

pub mod backend;
pub mod error;
pub mod pool;
pub mod worker;

pub use backend::{Backend, BackendFactory, StdioBackend, StdioBackendFactory};
pub use error::{BackendError, DispatchError};
pub use pool::{PoolConfig, WorkerPool};
pub use worker::Worker;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;

/// Scope required for tool-execution class operations
pub const SCOPE_TOOLS: &str = "tools";

/// Authenticated caller identity, produced per request by the auth layer
///
/// Never persisted; the pool consumes it for capability checks only.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub principal_id: String,
    pub scopes: HashSet<String>,
}

impl AuthContext {
    pub fn new(principal_id: impl Into<String>, scopes: impl IntoIterator<Item = String>) -> Self {
        Self {
            principal_id: principal_id.into(),
            scopes: scopes.into_iter().collect(),
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }
}

/// Call-routing surface injected into the HTTP layer
///
/// [`WorkerPool`] is the production implementation; tests substitute
/// fakes.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(
        &self,
        ctx: &AuthContext,
        method: &str,
        params: Value,
    ) -> Result<Value, DispatchError>;
}
