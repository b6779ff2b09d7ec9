//! Resolver worker pool
//!
//! Expensive field resolution (per-node derived values) runs in separate worker
//! processes. Workers never see the main process's state; every store read they need
//! goes back to the parent as an RPC over the same newline-delimited JSON channel that
//! carries field calls.
//!
//! The query executor only sees the [`FieldDispatcher`] seam. [`pool::WorkerPool`]
//! dispatches to child processes sharded by node id; [`resolvers::LocalResolvers`] runs
//! the same resolvers in-process.

pub mod api;
pub mod cache;
pub mod child;
pub mod pool;
pub mod protocol;
pub mod resolvers;

pub use api::{ParentApi, RemoteCall};
pub use cache::{cache_key, DerivedCache};
pub use pool::WorkerPool;
pub use resolvers::{FieldResolver, LocalResolvers, ResolverRegistry};

use crate::error::BuildError;
use crate::node::Node;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One worker-resolved field on one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub plugin: String,
    pub type_name: String,
    pub field_name: String,
    pub node: Node,
    #[serde(default)]
    pub options: Value,
}

#[async_trait]
pub trait FieldDispatcher: Send + Sync {
    async fn resolve(&self, request: ResolveRequest) -> Result<Value, BuildError>;
}
