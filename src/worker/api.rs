//! Remotely callable parent API
//!
//! The exact set of store operations a worker may invoke. Requests arrive by name with
//! positional `args`; anything not listed here is rejected.

use crate::error::BuildError;
use crate::state::SiteState;
use crate::store::NodeReader;
use serde_json::Value;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    GetNode { id: String },
    GetNodesByType { node_type: String },
    HasNodeChanged { id: String, digest: String },
    /// Read a node and record that `path` depends on it
    GetNodeAndSavePathDependency { id: String, path: String },
    /// Fire-and-forget log line: `{fnName, args}`
    Reporter { fn_name: String, args: Vec<Value> },
}

impl RemoteCall {
    pub fn parse(name: &str, args: &Value) -> Result<Self, BuildError> {
        match name {
            "getNode" => Ok(RemoteCall::GetNode {
                id: string_arg(name, args, 0)?,
            }),
            "getNodesByType" => Ok(RemoteCall::GetNodesByType {
                node_type: string_arg(name, args, 0)?,
            }),
            "hasNodeChanged" => Ok(RemoteCall::HasNodeChanged {
                id: string_arg(name, args, 0)?,
                digest: string_arg(name, args, 1)?,
            }),
            "getNodeAndSavePathDependency" => Ok(RemoteCall::GetNodeAndSavePathDependency {
                id: string_arg(name, args, 0)?,
                path: string_arg(name, args, 1)?,
            }),
            "reporter" => {
                let fn_name = args
                    .get("fnName")
                    .and_then(Value::as_str)
                    .unwrap_or("info")
                    .to_string();
                let args = args
                    .get("args")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                Ok(RemoteCall::Reporter { fn_name, args })
            }
            other => Err(BuildError::Protocol(format!(
                "\"{}\" is not a remotely callable API",
                other
            ))),
        }
    }
}

fn string_arg(name: &str, args: &Value, index: usize) -> Result<String, BuildError> {
    args.get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            BuildError::Protocol(format!("{} expects a string argument at position {}", name, index))
        })
}

/// Parent-side implementation of [`RemoteCall`] over the site state
#[derive(Clone)]
pub struct ParentApi {
    state: SiteState,
}

impl ParentApi {
    pub fn new(state: SiteState) -> Self {
        ParentApi { state }
    }

    pub fn handle(&self, call: RemoteCall) -> Result<Value, BuildError> {
        debug!(call = ?call, "Handling worker RPC");
        match call {
            RemoteCall::GetNode { id } => Ok(self
                .state
                .nodes
                .read()
                .get_node(&id)
                .map(|n| n.to_value())
                .unwrap_or(Value::Null)),
            RemoteCall::GetNodesByType { node_type } => Ok(Value::Array(
                self.state
                    .nodes
                    .read()
                    .get_nodes_by_type(&node_type)
                    .into_iter()
                    .map(|n| n.to_value())
                    .collect(),
            )),
            RemoteCall::HasNodeChanged { id, digest } => {
                Ok(Value::Bool(self.state.nodes.read().has_node_changed(&id, &digest)))
            }
            RemoteCall::GetNodeAndSavePathDependency { id, path } => {
                self.state.graph.lock().record_page_node_dependency(&path, &id);
                Ok(self
                    .state
                    .nodes
                    .read()
                    .get_node(&id)
                    .map(|n| n.to_value())
                    .unwrap_or(Value::Null))
            }
            RemoteCall::Reporter { fn_name, args } => {
                let message = args
                    .iter()
                    .map(|a| match a {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                match fn_name.as_str() {
                    "warn" => warn!(target: "sitegraph::worker", "{}", message),
                    "error" | "panic" | "panicOnBuild" => error!(target: "sitegraph::worker", "{}", message),
                    _ => info!(target: "sitegraph::worker", "{}", message),
                }
                Ok(Value::Null)
            }
        }
    }

    /// Parse and handle in one step
    pub fn call(&self, name: &str, args: &Value) -> Result<Value, BuildError> {
        self.handle(RemoteCall::parse(name, args)?)
    }
}
