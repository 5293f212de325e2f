// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Stdio backend process client
//!
//! Tool servers are child processes speaking newline-delimited JSON-RPC
//! 2.0 on stdin/stdout. A [`StdioBackend`] owns one child exclusively;
//! replacement is always destroy-then-recreate, never in-place mutation
//! of a live handle.

use crate::error::BackendError;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

/// Protocol version advertised during the stdio handshake
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// One request/response conversation partner
///
/// Callers must serialize access themselves; a backend carries at most
/// one in-flight request. The pool enforces this through the worker
/// busy state.
#[async_trait]
pub trait Backend: Send {
    /// Forward a single call and await exactly one reply
    async fn request(&mut self, method: &str, params: Value) -> Result<Value, BackendError>;

    /// Tear down the underlying process or connection
    async fn shutdown(&mut self);
}

/// Creates backend connections for pool workers
#[async_trait]
pub trait BackendFactory: Send + Sync + 'static {
    async fn connect(&self, worker_id: usize) -> Result<Box<dyn Backend>, BackendError>;
}

/// A tool-server child process with piped stdio
pub struct StdioBackend {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
}

impl StdioBackend {
    /// Spawn the backend command and complete the initialize handshake
    ///
    /// A backend whose handshake fails is unusable; the error propagates
    /// so the pool can keep the worker out of the idle set.
    pub async fn spawn(
        command: &str,
        args: &[String],
        worker_id: usize,
    ) -> Result<Self, BackendError> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .map(BufWriter::new)
            .ok_or_else(|| BackendError::Protocol("child stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .map(|out| BufReader::new(out).lines())
            .ok_or_else(|| BackendError::Protocol("child stdout unavailable".into()))?;

        // Drain stderr into the gateway log so backend diagnostics are
        // not lost when the child is replaced.
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(worker_id, "backend stderr: {}", line);
                }
            });
        }

        let mut backend = Self {
            child,
            stdin,
            stdout,
            next_id: 0,
        };
        backend.initialize().await?;
        Ok(backend)
    }

    async fn initialize(&mut self) -> Result<(), BackendError> {
        self.call(
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "clientInfo": {
                    "name": "toolgate",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        )
        .await?;
        self.notify("notifications/initialized").await
    }

    async fn notify(&mut self, method: &str) -> Result<(), BackendError> {
        let frame = json!({ "jsonrpc": "2.0", "method": method });
        self.write_frame(&frame).await
    }

    async fn write_frame(&mut self, frame: &Value) -> Result<(), BackendError> {
        let mut line = serde_json::to_vec(frame)
            .map_err(|err| BackendError::Protocol(err.to_string()))?;
        line.push(b'\n');
        self.stdin.write_all(&line).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn call(&mut self, method: &str, params: Value) -> Result<Value, BackendError> {
        self.next_id += 1;
        let id = self.next_id;
        let frame = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        self.write_frame(&frame).await?;

        // Skip backend-originated notifications until our reply arrives.
        loop {
            let line = match self.stdout.next_line().await? {
                Some(line) => line,
                None => return Err(BackendError::ProcessExited),
            };
            if line.trim().is_empty() {
                continue;
            }
            let reply: Value = serde_json::from_str(&line)
                .map_err(|err| BackendError::Protocol(format!("{}: {}", err, line)))?;

            match reply.get("id").and_then(Value::as_u64) {
                Some(reply_id) if reply_id == id => {
                    if let Some(error) = reply.get("error") {
                        return Err(BackendError::Rpc {
                            code: error.get("code").and_then(Value::as_i64).unwrap_or(-32000),
                            message: error
                                .get("message")
                                .and_then(Value::as_str)
                                .unwrap_or("unknown backend error")
                                .to_string(),
                        });
                    }
                    return Ok(reply.get("result").cloned().unwrap_or(Value::Null));
                }
                Some(other) => {
                    return Err(BackendError::Protocol(format!(
                        "reply id {} does not match request id {}",
                        other, id
                    )));
                }
                None => {
                    debug!(method = ?reply.get("method"), "dropping backend notification");
                }
            }
        }
    }
}

#[async_trait]
impl Backend for StdioBackend {
    async fn request(&mut self, method: &str, params: Value) -> Result<Value, BackendError> {
        self.call(method, params).await
    }

    async fn shutdown(&mut self) {
        if let Err(err) = self.child.kill().await {
            warn!("failed to kill backend process: {}", err);
        }
    }
}

/// Spawns [`StdioBackend`]s from a configured command line
pub struct StdioBackendFactory {
    command: String,
    args: Vec<String>,
}

impl StdioBackendFactory {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

#[async_trait]
impl BackendFactory for StdioBackendFactory {
    async fn connect(&self, worker_id: usize) -> Result<Box<dyn Backend>, BackendError> {
        let backend = StdioBackend::spawn(&self.command, &self.args, worker_id).await?;
        debug!(worker_id, command = %self.command, "backend process connected");
        Ok(Box::new(backend))
    }
}
