// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Mock dependencies for tests
//!
//! A scriptable [`Dispatcher`] plus a state builder wired to an
//! in-memory database and a tempdir-backed object store. Compiled into
//! the crate so integration tests and inline tests share one setup.

use crate::config::ServerConfig;
use crate::sse::SessionRegistry;
use crate::state::AppState;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use toolgate_local_db::Database;
use toolgate_pool::{AuthContext, DispatchError, Dispatcher, SCOPE_TOOLS};
use toolgate_storage::FsObjectStore;

type Handler = dyn Fn(&str, &Value) -> Result<Value, DispatchError> + Send + Sync;

/// Dispatcher test double that records calls and answers from a
/// programmable handler
pub struct MockDispatcher {
    calls: Mutex<Vec<String>>,
    handler: Box<Handler>,
}

impl MockDispatcher {
    /// Default behavior: `tools/list` and `tools/call` succeed,
    /// `explode` fails with a backend error, anything else echoes its
    /// params.
    pub fn new() -> Self {
        Self::with_handler(|method, params| match method {
            "tools/list" => Ok(json!({ "tools": [{ "name": "echo" }] })),
            "tools/call" => Ok(json!({
                "content": [{ "type": "text", "text": "ok" }],
            })),
            "explode" => Err(DispatchError::Backend("scripted failure".to_string())),
            _ => Ok(params.clone()),
        })
    }

    pub fn with_handler(
        handler: impl Fn(&str, &Value) -> Result<Value, DispatchError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            handler: Box::new(handler),
        }
    }

    /// Methods dispatched so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl Default for MockDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dispatcher for MockDispatcher {
    async fn dispatch(
        &self,
        ctx: &AuthContext,
        method: &str,
        params: Value,
    ) -> Result<Value, DispatchError> {
        if method == "tools/call" && !ctx.has_scope(SCOPE_TOOLS) {
            return Err(DispatchError::Unauthorized(format!(
                "missing required scope '{}'",
                SCOPE_TOOLS
            )));
        }
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(method.to_string());
        }
        (self.handler)(method, &params)
    }
}

/// Build an [`AppState`] backed entirely by in-process fakes
///
/// Storage and workspaces live under fresh tempdirs that are leaked for
/// the duration of the test process.
pub fn test_state() -> (AppState, Arc<MockDispatcher>) {
    test_state_with(MockDispatcher::new(), ServerConfig::default())
}

pub fn test_state_with(
    dispatcher: MockDispatcher,
    mut config: ServerConfig,
) -> (AppState, Arc<MockDispatcher>) {
    let storage_dir = tempfile::tempdir().expect("create storage dir").keep();
    let workspace_dir = tempfile::tempdir().expect("create workspace dir").keep();
    config.storage.root = storage_dir;
    config.generation.workspace_root = workspace_dir;

    let dispatcher = Arc::new(dispatcher);
    let state = AppState {
        db: Arc::new(Database::open_in_memory().expect("open in-memory db")),
        storage: Arc::new(FsObjectStore::new(
            config.storage.root.clone(),
            config.storage.public_base_url.clone(),
            config.storage.signing_key.as_bytes().to_vec(),
        )),
        dispatcher: dispatcher.clone(),
        sessions: Arc::new(SessionRegistry::new()),
        config,
    };

    (state, dispatcher)
}
