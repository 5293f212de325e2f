// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Stdio entrypoint for the mock tool server

use clap::Parser;
use mock_tool_server::{serve, ServerOptions};
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Tool names whose invocation fails with a JSON-RPC error
    #[arg(long)]
    fail_tool: Vec<String>,

    /// Exit with status 1 upon receiving this method (crash simulation)
    #[arg(long)]
    exit_on_method: Option<String>,

    /// Delay every reply by this many milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the wire protocol.
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let args = Args::parse();
    let options = ServerOptions {
        fail_tools: args.fail_tool,
        exit_on_method: args.exit_on_method,
        delay: args.delay_ms.map(Duration::from_millis),
    };

    serve(tokio::io::stdin(), tokio::io::stdout(), options).await
}
