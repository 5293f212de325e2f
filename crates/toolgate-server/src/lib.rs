// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Toolgate JSON-RPC gateway server
//!
//! Exposes a JSON-RPC 2.0 surface over plain HTTP POST and an SSE
//! session bridge, routes calls to a bounded pool of tool-server child
//! processes, and intercepts the project-generation tool to capture,
//! archive, and durably store its output.

pub mod auth;
pub mod config;
pub mod dependencies;
pub mod error;
pub mod generation;
pub mod handlers;
pub mod mock_dependencies;
pub mod rpc;
pub mod server;
pub mod sse;
pub mod state;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::{build_router, Server};
pub use state::AppState;
