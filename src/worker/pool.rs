//! Parent side of the worker pool
//!
//! Field calls are sharded by node id, so repeated resolutions for one node land on the
//! same worker and reuse its in-memory cache. Each connection has a reader task that
//! routes field results to waiting calls and answers worker RPC requests from the
//! [`ParentApi`].

use super::api::ParentApi;
use super::protocol::{message_lines, spawn_writer, FieldCall, FieldReply, Message, RpcResponse};
use super::resolvers::field_error;
use super::{FieldDispatcher, ResolveRequest};
use crate::config::WorkerPoolConfig;
use crate::error::BuildError;
use crate::hashing::shard_for;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type PendingCalls = Arc<Mutex<HashMap<u64, oneshot::Sender<FieldReply>>>>;

struct WorkerConnection {
    outbound: mpsc::UnboundedSender<Message>,
    pending: PendingCalls,
}

pub struct WorkerPool {
    workers: Vec<WorkerConnection>,
    next_id: AtomicU64,
    timeout: Duration,
    cancel: CancellationToken,
    children: Mutex<Vec<Child>>,
}

impl WorkerPool {
    /// Start `pool_size` worker processes running the `worker` subcommand
    pub async fn spawn(config: &WorkerPoolConfig, site_root: &Path, api: ParentApi) -> Result<Self, BuildError> {
        let program = match &config.program {
            Some(program) => program.clone(),
            None => std::env::current_exe()
                .map_err(|e| BuildError::Config(format!("Cannot locate worker executable: {}", e)))?,
        };

        let mut connections = Vec::with_capacity(config.pool_size);
        let mut children = Vec::with_capacity(config.pool_size);
        for index in 0..config.pool_size {
            let mut child = Command::new(&program)
                .arg("worker")
                .arg("--site-root")
                .arg(site_root)
                .env("SITEGRAPH_WORKER_INDEX", index.to_string())
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| BuildError::Config(format!("Failed to spawn worker {}: {}", index, e)))?;
            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| BuildError::Protocol(format!("worker {} has no stdin", index)))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| BuildError::Protocol(format!("worker {} has no stdout", index)))?;
            connections.push((stdout, stdin));
            children.push(child);
        }

        let pool = Self::connect(
            connections,
            api,
            Duration::from_millis(config.rpc_timeout_ms),
        );
        *pool.children.lock() = children;
        info!(workers = config.pool_size, program = %program.display(), "Started worker pool");
        Ok(pool)
    }

    /// Build a pool over already-open channels, one `(reader, writer)` pair per worker
    pub fn connect<R, W>(connections: Vec<(R, W)>, api: ParentApi, timeout: Duration) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let workers = connections
            .into_iter()
            .enumerate()
            .map(|(index, (reader, writer))| {
                let outbound = spawn_writer(writer);
                let pending: PendingCalls = Arc::new(Mutex::new(HashMap::new()));
                tokio::spawn(read_loop(
                    index,
                    reader,
                    outbound.clone(),
                    Arc::clone(&pending),
                    api.clone(),
                    cancel.child_token(),
                ));
                WorkerConnection { outbound, pending }
            })
            .collect();

        WorkerPool {
            workers,
            next_id: AtomicU64::new(1),
            timeout,
            cancel,
            children: Mutex::new(Vec::new()),
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Stop reader loops and kill worker processes
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let children = std::mem::take(&mut *self.children.lock());
        for mut child in children {
            if let Err(e) = child.kill().await {
                debug!(error = %e, "Worker already exited");
            }
        }
        info!("Worker pool shut down");
    }
}

async fn read_loop<R>(
    index: usize,
    reader: R,
    outbound: mpsc::UnboundedSender<Message>,
    pending: PendingCalls,
    api: ParentApi,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = message_lines(reader);
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!(worker = index, "Worker closed its channel");
                break;
            }
            Err(e) => {
                warn!(worker = index, error = %e, "Failed to read from worker");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match Message::decode(&line) {
            Ok(Message::Result(reply)) => {
                let waiter = pending.lock().remove(&reply.id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(reply);
                    }
                    None => debug!(worker = index, id = reply.id, "Result for an expired call"),
                }
            }
            Ok(Message::Request(request)) => {
                let outcome = api.call(&request.name, &request.args);
                match (request.id, outcome) {
                    (Some(id), Ok(value)) => {
                        let _ = outbound.send(Message::Response(RpcResponse::ok(id, value)));
                    }
                    (Some(id), Err(e)) => {
                        let _ = outbound.send(Message::Response(RpcResponse::error(id, e.to_string())));
                    }
                    (None, Err(e)) => warn!(worker = index, call = %request.name, error = %e, "Worker notification failed"),
                    (None, Ok(_)) => {}
                }
            }
            Ok(other) => warn!(worker = index, message = ?other, "Unexpected message from worker"),
            Err(e) => warn!(worker = index, error = %e, "Ignoring malformed line from worker"),
        }
    }
    // waiting calls see their sender dropped
    pending.lock().clear();
}

#[async_trait]
impl FieldDispatcher for WorkerPool {
    async fn resolve(&self, request: ResolveRequest) -> Result<Value, BuildError> {
        let shard = shard_for(&request.node.id, self.workers.len());
        let worker = self
            .workers
            .get(shard)
            .ok_or_else(|| field_error(&request, "worker pool is empty"))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        worker.pending.lock().insert(id, tx);

        let call = Message::Call(FieldCall {
            id,
            plugin: request.plugin.clone(),
            type_name: request.type_name.clone(),
            field_name: request.field_name.clone(),
            node: request.node.clone(),
            args: request.options.clone(),
        });
        if worker.outbound.send(call).is_err() {
            worker.pending.lock().remove(&id);
            return Err(field_error(&request, "worker channel closed"));
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => match (reply.ok, reply.error) {
                (_, Some(error)) => Err(field_error(&request, error)),
                (Some(value), None) => Ok(value),
                (None, None) => Ok(Value::Null),
            },
            Ok(Err(_)) => Err(field_error(&request, "worker exited before replying")),
            Err(_) => {
                worker.pending.lock().remove(&id);
                Err(BuildError::WorkerTimeout {
                    plugin: request.plugin,
                    type_name: request.type_name,
                    field_name: request.field_name,
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
