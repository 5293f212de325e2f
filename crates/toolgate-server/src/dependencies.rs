// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Dependency wiring for the gateway server

use crate::config::ServerConfig;
use crate::sse::SessionRegistry;
use crate::state::AppState;
use anyhow::Result;
use std::sync::Arc;
use toolgate_local_db::Database;
use toolgate_pool::{Dispatcher, PoolConfig, StdioBackendFactory, WorkerPool};
use toolgate_storage::{FsObjectStore, ObjectStore};

/// Default dependency builder: SQLite, filesystem object store, and a
/// worker pool of real backend child processes
pub struct DefaultServerDependencies {
    state: AppState,
}

impl DefaultServerDependencies {
    /// Build default dependencies and spawn the backend pool
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let db = if config.database_path == ":memory:" {
            Arc::new(Database::open_in_memory()?)
        } else {
            Arc::new(Database::open(&config.database_path)?)
        };

        let storage: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(
            config.storage.root.clone(),
            config.storage.public_base_url.clone(),
            config.storage.signing_key.as_bytes().to_vec(),
        ));

        let factory = Box::new(StdioBackendFactory::new(
            &config.pool.command,
            config.pool.args.clone(),
        ));
        let pool = WorkerPool::connect(
            PoolConfig {
                size: config.pool.size,
                dispatch_timeout: config.pool.dispatch_timeout,
                allow_tool_calls: config.pool.allow_tool_calls,
                ..PoolConfig::default()
            },
            factory,
        )
        .await?;
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(pool);

        let state = AppState {
            db,
            storage,
            dispatcher,
            sessions: Arc::new(SessionRegistry::new()),
            config,
        };

        Ok(Self { state })
    }

    /// Consume the dependency builder and return the resulting app state
    pub fn into_state(self) -> AppState {
        self.state
    }
}
