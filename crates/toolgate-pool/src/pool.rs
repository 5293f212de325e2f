// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Fixed-size worker pool with FIFO dispatch

use crate::backend::BackendFactory;
use crate::error::{BackendError, DispatchError};
use crate::worker::Worker;
use crate::{AuthContext, Dispatcher, SCOPE_TOOLS};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Worker pool configuration, immutable after construction
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of backend processes to keep alive
    pub size: usize,

    /// Bound on how long a dispatch may wait for a free worker
    pub dispatch_timeout: Duration,

    /// Static gate for tool-execution class operations
    pub allow_tool_calls: bool,

    /// Delay between attempts to replace a dead backend
    pub respawn_backoff: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 2,
            dispatch_timeout: Duration::from_secs(30),
            allow_tool_calls: true,
            respawn_backoff: Duration::from_millis(500),
        }
    }
}

struct PoolState {
    idle: Vec<Worker>,
    waiters: VecDeque<oneshot::Sender<CheckedOutWorker>>,
    closed: bool,
}

struct Shared {
    state: Mutex<PoolState>,
    factory: Box<dyn BackendFactory>,
    config: PoolConfig,
}

/// Fixed-size pool of backend workers
///
/// Invariants: at most one in-flight call per worker; queued callers are
/// served in arrival order; a dead worker is never reused without
/// replacement.
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Build the pool and establish all backend connections
    ///
    /// Workers whose initial connection fails stay out of the idle set;
    /// the respawn path keeps retrying in the background until the slot
    /// is usable.
    pub async fn connect(
        config: PoolConfig,
        factory: Box<dyn BackendFactory>,
    ) -> Result<Self, DispatchError> {
        if config.size == 0 {
            return Err(DispatchError::Backend("pool size must be at least 1".into()));
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                idle: Vec::with_capacity(config.size),
                waiters: VecDeque::new(),
                closed: false,
            }),
            factory,
            config,
        });

        let mut connects = JoinSet::new();
        for worker_id in 0..shared.config.size {
            let shared = Arc::clone(&shared);
            connects.spawn(async move {
                match shared.factory.connect(worker_id).await {
                    Ok(backend) => {
                        release(&shared, Worker::new(worker_id, backend));
                    }
                    Err(err) => {
                        error!(worker_id, "initial backend connection failed: {}", err);
                        respawn(Arc::clone(&shared), worker_id);
                    }
                }
            });
        }
        while connects.join_next().await.is_some() {}

        info!(size = shared.config.size, "worker pool started");
        Ok(Self { shared })
    }

    /// Number of callers currently queued for a worker
    pub fn pending_waiters(&self) -> usize {
        self.shared.state.lock().expect("pool mutex poisoned").waiters.len()
    }

    /// Number of workers currently idle
    pub fn idle_workers(&self) -> usize {
        self.shared.state.lock().expect("pool mutex poisoned").idle.len()
    }

    /// Tear the pool down, killing all idle backend processes
    ///
    /// Queued callers fail; in-flight calls run to completion and their
    /// workers are destroyed on release.
    pub async fn shutdown(&self) {
        let (workers, waiters) = {
            let mut state = self.shared.state.lock().expect("pool mutex poisoned");
            state.closed = true;
            (
                std::mem::take(&mut state.idle),
                std::mem::take(&mut state.waiters),
            )
        };
        drop(waiters);
        for worker in workers {
            worker.shutdown().await;
        }
        info!("worker pool shut down");
    }

    /// Capability and policy checks, applied before a worker is consumed
    /// or the caller is queued
    fn check_policy(&self, ctx: &AuthContext, method: &str) -> Result<(), DispatchError> {
        if method == "tools/call" {
            if !self.shared.config.allow_tool_calls {
                return Err(DispatchError::Forbidden(
                    "tool execution is disabled for this deployment".into(),
                ));
            }
            if !ctx.has_scope(SCOPE_TOOLS) {
                return Err(DispatchError::Unauthorized(SCOPE_TOOLS.into()));
            }
        }
        Ok(())
    }

    async fn acquire(&self) -> Result<CheckedOutWorker, DispatchError> {
        let rx = {
            let mut state = self.shared.state.lock().expect("pool mutex poisoned");
            if state.closed {
                return Err(DispatchError::Backend("worker pool is shut down".into()));
            }
            if let Some(worker) = state.idle.pop() {
                return Ok(CheckedOutWorker::new(Arc::clone(&self.shared), worker));
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };

        // Dropping `rx` on timeout (or caller cancellation) releases the
        // queue slot: release() skips senders whose receiver is gone, and
        // a guard already sitting in the channel re-releases its worker
        // when the channel is destroyed.
        match tokio::time::timeout(self.shared.config.dispatch_timeout, rx).await {
            Ok(Ok(worker)) => Ok(worker),
            Ok(Err(_)) => Err(DispatchError::Backend("worker pool is shut down".into())),
            Err(_) => Err(DispatchError::Timeout),
        }
    }
}

/// A worker checked out of the pool
///
/// The guard keeps the slot accounted for even when the dispatch future
/// is dropped mid-flight (axum drops handler futures when the client
/// disconnects). A worker abandoned between calls goes straight back to
/// the pool; a worker abandoned with a call in flight is destroyed and
/// its slot respawned, since its stream still carries an unread reply.
struct CheckedOutWorker {
    worker: Option<Worker>,
    shared: Arc<Shared>,
    in_flight: bool,
}

impl CheckedOutWorker {
    fn new(shared: Arc<Shared>, worker: Worker) -> Self {
        Self {
            worker: Some(worker),
            shared,
            in_flight: false,
        }
    }

    fn id(&self) -> usize {
        self.worker.as_ref().map(Worker::id).unwrap_or_default()
    }

    async fn request(&mut self, method: &str, params: Value) -> Result<Value, BackendError> {
        self.in_flight = true;
        let outcome = match self.worker.as_mut() {
            Some(worker) => worker.request(method, params).await,
            None => Err(BackendError::ProcessExited),
        };
        // The reply (or the error) has been fully consumed; the stream
        // is no longer mid-conversation.
        self.in_flight = false;
        outcome
    }

    /// Destroy the worker's backend process and start its replacement
    fn discard_and_respawn(mut self) {
        if let Some(worker) = self.worker.take() {
            let worker_id = worker.id();
            drop(worker);
            respawn(Arc::clone(&self.shared), worker_id);
        }
    }
}

impl Drop for CheckedOutWorker {
    fn drop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        if self.in_flight {
            let worker_id = worker.id();
            warn!(worker_id, "dispatch abandoned mid-call; replacing its backend");
            drop(worker);
            respawn(Arc::clone(&self.shared), worker_id);
        } else {
            release(&self.shared, worker);
        }
    }
}

/// Hand a worker to the longest-waiting caller, or return it to the
/// idle set
fn release(shared: &Arc<Shared>, worker: Worker) {
    let mut state = shared.state.lock().expect("pool mutex poisoned");
    if state.closed {
        // Pool is going away; drop the worker (kill_on_drop reaps the
        // child process).
        return;
    }
    let mut worker = worker;
    loop {
        match state.waiters.pop_front() {
            Some(tx) => {
                // The hand-off travels as a guard: if the receiver is
                // dropped after the send lands, destroying the channel
                // re-releases the worker instead of losing the slot.
                let guard = CheckedOutWorker::new(Arc::clone(shared), worker);
                match tx.send(guard) {
                    Ok(()) => return,
                    // Receiver already gone (timeout or cancelled
                    // caller); serve the next waiter without disturbing
                    // their order.
                    Err(mut returned) => {
                        worker = match returned.worker.take() {
                            Some(worker) => worker,
                            None => return,
                        };
                    }
                }
            }
            None => {
                state.idle.push(worker);
                return;
            }
        }
    }
}

/// Replace a dead worker's backend process, keeping the worker id
fn respawn(shared: Arc<Shared>, worker_id: usize) {
    tokio::spawn(async move {
        loop {
            if shared.state.lock().expect("pool mutex poisoned").closed {
                return;
            }
            match shared.factory.connect(worker_id).await {
                Ok(backend) => {
                    info!(worker_id, "backend process replaced");
                    release(&shared, Worker::new(worker_id, backend));
                    return;
                }
                Err(err) => {
                    warn!(worker_id, "backend respawn failed: {}", err);
                    tokio::time::sleep(shared.config.respawn_backoff).await;
                }
            }
        }
    });
}

#[async_trait]
impl Dispatcher for WorkerPool {
    /// Route one authorized call to an idle worker and await its reply
    async fn dispatch(
        &self,
        ctx: &AuthContext,
        method: &str,
        params: Value,
    ) -> Result<Value, DispatchError> {
        self.check_policy(ctx, method)?;

        let mut worker = self.acquire().await?;
        let outcome = worker.request(method, params).await;

        match outcome {
            // Dropping the guard returns the worker to the pool.
            Ok(value) => Ok(value),
            Err(err) if err.is_fatal() => {
                error!(worker_id = worker.id(), "backend failed mid-call: {}", err);
                let message = err.to_string();
                // The dead worker is destroyed; its slot stays out of
                // the idle set until the replacement connects.
                worker.discard_and_respawn();
                Err(DispatchError::Backend(message))
            }
            // Protocol-level error reply; the process is healthy and
            // the guard hands it back.
            Err(err) => Err(DispatchError::Backend(err.to_string())),
        }
    }
}
