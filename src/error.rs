//! Error types for the sitegraph build core.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Node store and persistence errors
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Node {id} changed type from {from} to {to}; delete and re-create it instead")]
    TypeChanged { id: String, from: String, to: String },

    #[error("Storage I/O error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(Arc::new(err))
    }
}

/// Errors surfaced to the build driver.
///
/// Cloneable so one failure can be handed to every waiter on a drain barrier.
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(
        "The query for {query_id} ({component}) failed.\n\nErrors:\n{}\n\nContext:\n{context}\n\nPlugin: {plugin}\n\nQuery:\n{query}",
        .errors.join("\n")
    )]
    QueryFailed {
        query_id: String,
        component: String,
        context: String,
        query: String,
        errors: Vec<String>,
        plugin: String,
    },

    #[error("Worker resolver for {type_name}.{field_name} (plugin {plugin}) failed: {message}")]
    WorkerRpc {
        plugin: String,
        type_name: String,
        field_name: String,
        message: String,
    },

    #[error("Worker resolver timed out after {timeout_ms}ms waiting for {type_name}.{field_name} (plugin {plugin})")]
    WorkerTimeout {
        plugin: String,
        type_name: String,
        field_name: String,
        timeout_ms: u64,
    },

    #[error("Failed to write artifact {path:?}: {source}")]
    WriteFailed {
        path: PathBuf,
        source: Arc<std::io::Error>,
    },

    #[error("Page not found: {0}")]
    PageNotFound(String),

    #[error("{queue} job {key} panicked: {message}")]
    JobPanicked {
        queue: String,
        key: String,
        message: String,
    },

    #[error("Worker protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Plugin {plugin} failed: {message}")]
    Plugin { plugin: String, message: String },
}

impl BuildError {
    pub fn write_failed(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        BuildError::WriteFailed {
            path: path.into(),
            source: Arc::new(err),
        }
    }
}

impl From<config::ConfigError> for BuildError {
    fn from(err: config::ConfigError) -> Self {
        BuildError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for BuildError {
    fn from(err: serde_json::Error) -> Self {
        BuildError::Protocol(err.to_string())
    }
}
