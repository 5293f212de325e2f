// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Server configuration
//!
//! All values are supplied at process start (CLI flags) and are
//! immutable for the process's lifetime.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_addr: SocketAddr,

    /// Path to SQLite database (`:memory:` for ephemeral state)
    pub database_path: String,

    /// Enable permissive CORS headers for development
    pub enable_cors: bool,

    /// API key for authentication (root credential, all scopes)
    pub api_key: Option<String>,

    /// JWT secret for token validation
    pub jwt_secret: Option<String>,

    /// Backend worker pool settings
    pub pool: PoolSettings,

    /// Interval between SSE keepalive frames
    pub keepalive_interval: Duration,

    /// Durable artifact storage settings
    pub storage: StorageSettings,

    /// Intercepted generation pipeline settings
    pub generation: GenerationSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3030".parse().expect("valid socket address"),
            database_path: ":memory:".to_string(),
            enable_cors: false,
            api_key: None,
            jwt_secret: None,
            pool: PoolSettings::default(),
            keepalive_interval: Duration::from_secs(15),
            storage: StorageSettings::default(),
            generation: GenerationSettings::default(),
        }
    }
}

/// Backend worker pool settings
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Number of backend tool-server processes
    pub size: usize,

    /// Command used to start each backend process
    pub command: String,

    /// Arguments passed to the backend command
    pub args: Vec<String>,

    /// Whether tool-execution class operations are permitted at all
    pub allow_tool_calls: bool,

    /// Bound on how long a call may wait for a free worker
    pub dispatch_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            size: 2,
            command: "mock-tool-server".to_string(),
            args: Vec::new(),
            allow_tool_calls: true,
            dispatch_timeout: Duration::from_secs(30),
        }
    }
}

/// Durable artifact storage settings
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Filesystem root for stored objects
    pub root: PathBuf,

    /// Public base URL embedded in presigned links
    pub public_base_url: String,

    /// HMAC signing key for presigned links
    pub signing_key: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("toolgate-artifacts"),
            public_base_url: "http://127.0.0.1:3030/artifacts".to_string(),
            signing_key: "development-signing-key".to_string(),
        }
    }
}

/// Intercepted generation pipeline settings
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    /// Tool name whose invocation triggers the generation pipeline
    pub tool_name: String,

    /// Root directory for per-generation scratch workspaces
    pub workspace_root: PathBuf,

    /// Lifetime of presigned artifact links in responses
    pub link_ttl: Duration,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            tool_name: "generate_project".to_string(),
            workspace_root: std::env::temp_dir().join("toolgate-workspaces"),
            link_ttl: Duration::from_secs(3600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_local_only_and_tool_calls_enabled() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:3030".parse().unwrap());
        assert_eq!(config.database_path, ":memory:");
        assert!(config.pool.allow_tool_calls);
        assert_eq!(config.generation.tool_name, "generate_project");
        assert_eq!(config.keepalive_interval, Duration::from_secs(15));
    }
}
