// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Dispatch and backend error types

/// Errors surfaced by [`WorkerPool::dispatch`](crate::WorkerPool::dispatch)
///
/// The pool never retries internally; each variant maps to a stable
/// HTTP/JSON-RPC error kind at the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The caller lacks a capability the requested operation requires
    #[error("Missing required scope: {0}")]
    Unauthorized(String),

    /// The operation class is disabled for this deployment
    #[error("Operation not permitted: {0}")]
    Forbidden(String),

    /// No worker became free within the dispatch timeout (retryable)
    #[error("No backend worker became available in time")]
    Timeout,

    /// The backend process failed or returned a protocol-level error
    #[error("Backend failure: {0}")]
    Backend(String),
}

/// Errors from a single backend process conversation
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend answered with a JSON-RPC error envelope. The process
    /// itself is still healthy.
    #[error("backend rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("backend process I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend process exited")]
    ProcessExited,

    #[error("malformed backend reply: {0}")]
    Protocol(String),
}

impl BackendError {
    /// Whether the underlying process must be replaced
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BackendError::Rpc { .. })
    }
}
