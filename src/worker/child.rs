//! Worker process side
//!
//! Reads field calls from the parent, resolves each on its own task, and answers with
//! a field result. Store reads a resolver needs go back to the parent through
//! [`RpcClient`].

use super::cache::DerivedCache;
use super::protocol::{message_lines, spawn_writer, FieldCall, FieldReply, Message, RpcRequest, RpcResponse};
use super::resolvers::{ParentCalls, ResolveContext, ResolverRegistry};
use super::ResolveRequest;
use crate::config::SiteConfig;
use crate::error::BuildError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub cache_dir: PathBuf,
    pub path_prefix: String,
    pub rpc_timeout: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &SiteConfig) -> Self {
        WorkerSettings {
            cache_dir: config.cache_path().join("derived"),
            path_prefix: config.effective_path_prefix().to_string(),
            rpc_timeout: Duration::from_millis(config.workers.rpc_timeout_ms),
        }
    }
}

/// Worker-side RPC client for the parent API
pub struct RpcClient {
    outbound: mpsc::UnboundedSender<Message>,
    pending: Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(outbound: mpsc::UnboundedSender<Message>, timeout: Duration) -> Self {
        RpcClient {
            outbound,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            timeout,
        }
    }

    /// Route a parent response to its waiting call
    pub fn complete(&self, response: RpcResponse) {
        match self.pending.lock().remove(&response.id) {
            Some(waiter) => {
                let _ = waiter.send(response);
            }
            None => debug!(id = response.id, "Response for an expired call"),
        }
    }
}

#[async_trait]
impl ParentCalls for RpcClient {
    async fn call(&self, name: &str, args: Value) -> Result<Value, BuildError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let request = Message::Request(RpcRequest {
            name: name.to_string(),
            args,
            id: Some(id),
        });
        if self.outbound.send(request).is_err() {
            self.pending.lock().remove(&id);
            return Err(BuildError::Protocol("parent channel closed".to_string()));
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => match response.error {
                Some(error) => Err(BuildError::Protocol(format!("{} failed: {}", name, error))),
                None => Ok(response.response),
            },
            Ok(Err(_)) => Err(BuildError::Protocol(format!(
                "parent went away before answering {}",
                name
            ))),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(BuildError::Protocol(format!(
                    "{} got no reply within {}ms",
                    name,
                    self.timeout.as_millis()
                )))
            }
        }
    }

    fn report(&self, fn_name: &str, message: &str) {
        let _ = self.outbound.send(Message::Request(RpcRequest {
            name: "reporter".to_string(),
            args: json!({"fnName": fn_name, "args": [message]}),
            id: None,
        }));
    }
}

struct WorkerShared {
    registry: ResolverRegistry,
    plugins: Vec<String>,
    cache: DerivedCache,
    path_prefix: String,
    client: Arc<RpcClient>,
}

impl WorkerShared {
    async fn resolve(&self, call: FieldCall) -> FieldReply {
        let id = call.id;
        let request = ResolveRequest {
            plugin: call.plugin,
            type_name: call.type_name,
            field_name: call.field_name,
            node: call.node,
            options: call.args,
        };
        let ctx = ResolveContext {
            parent: self.client.as_ref(),
            cache: &self.cache,
            plugins: &self.plugins,
            path_prefix: &self.path_prefix,
        };
        match self.registry.resolve(&request, &ctx).await {
            Ok(value) => FieldReply {
                id,
                ok: Some(value),
                error: None,
            },
            Err(err) => FieldReply {
                id,
                ok: None,
                error: Some(match err {
                    BuildError::WorkerRpc { message, .. } => message,
                    other => other.to_string(),
                }),
            },
        }
    }
}

/// Serve field calls until the parent closes the channel
pub async fn run_worker<R, W>(
    reader: R,
    writer: W,
    registry: ResolverRegistry,
    settings: WorkerSettings,
) -> Result<(), BuildError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let outbound = spawn_writer(writer);
    let client = Arc::new(RpcClient::new(outbound.clone(), settings.rpc_timeout));
    let shared = Arc::new(WorkerShared {
        plugins: registry.plugin_names(),
        registry,
        cache: DerivedCache::new(settings.cache_dir),
        path_prefix: settings.path_prefix,
        client: Arc::clone(&client),
    });

    let mut lines = message_lines(reader);
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => return Err(BuildError::Protocol(format!("failed to read from parent: {}", e))),
        };
        if line.trim().is_empty() {
            continue;
        }
        match Message::decode(&line) {
            Ok(Message::Call(call)) => {
                let shared = Arc::clone(&shared);
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    let reply = shared.resolve(call).await;
                    let _ = outbound.send(Message::Result(reply));
                });
            }
            Ok(Message::Response(response)) => client.complete(response),
            Ok(other) => warn!(message = ?other, "Unexpected message from parent"),
            Err(e) => warn!(error = %e, "Ignoring malformed line from parent"),
        }
    }

    info!("Parent closed the channel, worker exiting");
    Ok(())
}

/// Worker entry point over stdin/stdout
pub async fn run_stdio(config: &SiteConfig) -> Result<(), BuildError> {
    run_worker(
        tokio::io::stdin(),
        tokio::io::stdout(),
        ResolverRegistry::builtin(),
        WorkerSettings::from_config(config),
    )
    .await
}
