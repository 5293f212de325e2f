// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Toolgate gateway server binary

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use toolgate_logging::{init, CliLogLevel, Level, LogFormat};
use toolgate_server::{Server, ServerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bind address for the server
    #[arg(short, long, default_value = "127.0.0.1:3030")]
    bind: SocketAddr,

    /// Database path (SQLite)
    #[arg(short, long, default_value = ":memory:")]
    database: String,

    /// Enable CORS for development
    #[arg(long)]
    cors: bool,

    /// API key accepted as the root credential
    #[arg(long, env = "TOOLGATE_API_KEY")]
    api_key: Option<String>,

    /// Secret used to validate JWT bearer tokens
    #[arg(long, env = "TOOLGATE_JWT_SECRET")]
    jwt_secret: Option<String>,

    /// Number of backend tool-server processes
    #[arg(long, default_value_t = 2)]
    pool_size: usize,

    /// Command used to start each backend process
    #[arg(long, default_value = "mock-tool-server")]
    backend_command: String,

    /// Arguments passed to the backend command
    #[arg(long)]
    backend_arg: Vec<String>,

    /// Reject tool-execution class operations outright
    #[arg(long)]
    disable_tool_calls: bool,

    /// Seconds a call may wait for a free worker
    #[arg(long, default_value_t = 30)]
    dispatch_timeout: u64,

    /// Seconds between SSE keepalive frames
    #[arg(long, default_value_t = 15)]
    keepalive_interval: u64,

    /// Filesystem root for stored artifacts
    #[arg(long)]
    storage_root: Option<PathBuf>,

    /// Public base URL embedded in artifact links
    #[arg(long)]
    storage_base_url: Option<String>,

    /// HMAC signing key for artifact links
    #[arg(long, env = "TOOLGATE_SIGNING_KEY")]
    signing_key: Option<String>,

    /// Log level
    #[arg(short, long, value_enum, default_value = "info")]
    log_level: CliLogLevel,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level: Level = args.log_level.into();
    init("toolgate-server", default_level, LogFormat::Plaintext)?;

    tracing::info!("Starting Toolgate gateway server");

    let mut config = ServerConfig {
        bind_addr: args.bind,
        database_path: args.database,
        enable_cors: args.cors,
        api_key: args.api_key,
        jwt_secret: args.jwt_secret,
        keepalive_interval: Duration::from_secs(args.keepalive_interval),
        ..Default::default()
    };
    config.pool.size = args.pool_size;
    config.pool.command = args.backend_command;
    config.pool.args = args.backend_arg;
    config.pool.allow_tool_calls = !args.disable_tool_calls;
    config.pool.dispatch_timeout = Duration::from_secs(args.dispatch_timeout);
    if let Some(root) = args.storage_root {
        config.storage.root = root;
    }
    if let Some(base_url) = args.storage_base_url {
        config.storage.public_base_url = base_url;
    }
    if let Some(key) = args.signing_key {
        config.storage.signing_key = key;
    }

    let server = Server::new(config).await?;
    server.run().await?;

    Ok(())
}
