//! Query execution
//!
//! A [`QueryJob`] is one query bound to a page path or a static-query id. Jobs run
//! through the [`scheduler::QueryScheduler`]; each run is handled by the
//! [`runner::QueryRunner`], which executes the query through a [`QueryExecutor`],
//! records the dependencies the executor declared, and short-circuits on an unchanged
//! result hash.

pub mod runner;
pub mod scheduler;
pub mod selector;

pub use runner::{QueryOutcome, QueryRunner};
pub use scheduler::QueryScheduler;
pub use selector::SelectorExecutor;

use crate::depgraph::Dependency;
use crate::error::BuildError;
use crate::queue::Keyed;
use crate::schema::Schema;
use crate::store::NodeStore;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryJob {
    /// Page path or static-query id
    pub id: String,
    pub query: String,
    /// Variables visible to the query
    pub context: Value,
    pub is_page: bool,
    pub component_path: String,
    /// Plugin that created the page, for diagnostics
    pub plugin: String,
}

impl Keyed for QueryJob {
    fn key(&self) -> String {
        self.id.clone()
    }
}

/// Output of one execution; a non-empty `errors` means the query failed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub data: Value,
    pub errors: Vec<String>,
}

impl QueryResult {
    pub fn data(data: Value) -> Self {
        QueryResult {
            data,
            errors: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        QueryResult {
            data: Value::Null,
            errors: vec![message.into()],
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Collects the reads a query declares while it executes
///
/// The runner applies the collected edges to the dependency graph after the executor
/// returns, so executors never touch the graph directly.
#[derive(Debug, Default)]
pub struct DependencyRecorder {
    recorded: Mutex<Vec<Dependency>>,
}

impl DependencyRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_node_dependency(&self, path: &str, node_id: &str) {
        self.recorded.lock().push(Dependency::Node {
            query_id: path.to_string(),
            node_id: node_id.to_string(),
        });
    }

    pub fn declare_type_dependency(&self, path: &str, node_type: &str) {
        self.recorded.lock().push(Dependency::Type {
            query_id: path.to_string(),
            node_type: node_type.to_string(),
        });
    }

    pub fn declare_page_node_dependency(&self, page_path: &str, node_id: &str) {
        self.recorded.lock().push(Dependency::PageNode {
            page_path: page_path.to_string(),
            node_id: node_id.to_string(),
        });
    }

    pub fn take(&self) -> Vec<Dependency> {
        std::mem::take(&mut *self.recorded.lock())
    }
}

/// Everything an executor may read while running one job
pub struct QueryRequest<'a> {
    pub job: &'a QueryJob,
    pub schema: &'a Schema,
    /// Read-only for executors. Guards must not be held across an await.
    pub nodes: &'a RwLock<NodeStore>,
    pub recorder: &'a DependencyRecorder,
}

/// Executes query text against the schema and node store
///
/// Query-level problems (unknown field, bad variable) are reported in
/// [`QueryResult::errors`]. `Err` is reserved for failures that must abort the build in
/// every mode, such as a worker resolver timing out.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, request: QueryRequest<'_>) -> Result<QueryResult, BuildError>;
}
