// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Server state management

use crate::config::ServerConfig;
use crate::sse::SessionRegistry;
use std::sync::Arc;
use toolgate_local_db::Database;
use toolgate_pool::Dispatcher;
use toolgate_storage::ObjectStore;

/// Shared server state
///
/// Every dependency is an explicitly injected handle; nothing is looked
/// up ambiently.
#[derive(Clone)]
pub struct AppState {
    /// Database connection
    pub db: Arc<Database>,

    /// Durable artifact storage
    pub storage: Arc<dyn ObjectStore>,

    /// Backend call routing (worker pool in production)
    pub dispatcher: Arc<dyn Dispatcher>,

    /// Live SSE sessions
    pub sessions: Arc<SessionRegistry>,

    /// Server configuration
    pub config: ServerConfig,
}
