//! Persistence layer for build state
//!
//! Nodes and page descriptors carry arbitrary JSON fields, so they are stored as JSON
//! documents. Dependency edges, result hashes and the schema cache are plain typed
//! structures and go through bincode.

use crate::error::StoreError;
use crate::node::Node;
use crate::store::{MutationKind, NodeReader, NodeStore, Touched};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tracing::debug;

const NODES_TREE: &str = "nodes";
const DOCUMENTS_TREE: &str = "documents";
const STATE_TREE: &str = "state";

/// Sled-backed snapshot of everything that must survive a restart
pub struct SledStateStore {
    db: sled::Db,
    nodes: sled::Tree,
    documents: sled::Tree,
    state: sled::Tree,
}

fn storage_error(context: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Persistence(format!("{}: {}", context, e))
}

impl SledStateStore {
    /// Open (or create) the state database at the given directory
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| storage_error("Failed to open sled database", e))?;
        let nodes = db
            .open_tree(NODES_TREE)
            .map_err(|e| storage_error("Failed to open nodes tree", e))?;
        let documents = db
            .open_tree(DOCUMENTS_TREE)
            .map_err(|e| storage_error("Failed to open documents tree", e))?;
        let state = db
            .open_tree(STATE_TREE)
            .map_err(|e| storage_error("Failed to open state tree", e))?;
        Ok(Self {
            db,
            nodes,
            documents,
            state,
        })
    }

    /// Apply a pass's node mutations to disk
    ///
    /// Only touched ids are rewritten; deleted nodes are removed.
    pub fn save_touched_nodes(&self, store: &NodeStore, touched: &[Touched]) -> Result<(), StoreError> {
        let mut batch = sled::Batch::default();
        for t in touched {
            match (t.kind, store.get_node(&t.node_id)) {
                (MutationKind::Deleted, _) | (_, None) => batch.remove(t.node_id.as_bytes()),
                (_, Some(node)) => {
                    let value = serde_json::to_vec(node)
                        .map_err(|e| storage_error("Failed to serialize node", e))?;
                    batch.insert(t.node_id.as_bytes(), value);
                }
            }
        }
        self.nodes
            .apply_batch(batch)
            .map_err(|e| storage_error("Failed to apply node batch", e))?;
        debug!(count = touched.len(), "Persisted touched nodes");
        Ok(())
    }

    /// Rewrite every node in the store
    pub fn save_all_nodes(&self, store: &NodeStore) -> Result<(), StoreError> {
        self.nodes
            .clear()
            .map_err(|e| storage_error("Failed to clear nodes tree", e))?;
        let mut batch = sled::Batch::default();
        for node in store.get_all_nodes() {
            let value =
                serde_json::to_vec(node).map_err(|e| storage_error("Failed to serialize node", e))?;
            batch.insert(node.id.as_bytes(), value);
        }
        self.nodes
            .apply_batch(batch)
            .map_err(|e| storage_error("Failed to apply node batch", e))?;
        Ok(())
    }

    /// Rebuild a node store from disk
    pub fn load_nodes(&self) -> Result<NodeStore, StoreError> {
        let mut store = NodeStore::new();
        for item in self.nodes.iter() {
            let (_, value) = item.map_err(|e| storage_error("Failed to iterate nodes", e))?;
            let node: Node = serde_json::from_slice(&value)
                .map_err(|e| storage_error("Failed to deserialize node", e))?;
            store.create_node(node)?;
        }
        Ok(store)
    }

    /// Store a JSON document (pages, redirects, static queries)
    pub fn put_document<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| storage_error("Failed to serialize document", e))?;
        self.documents
            .insert(key.as_bytes(), bytes)
            .map_err(|e| storage_error("Failed to put document", e))?;
        Ok(())
    }

    pub fn get_document<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self
            .documents
            .get(key.as_bytes())
            .map_err(|e| storage_error("Failed to get document", e))?
        {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| storage_error("Failed to deserialize document", e)),
            None => Ok(None),
        }
    }

    /// Store a typed state blob (dependency graph, schema cache)
    pub fn put_state<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes =
            bincode::serialize(value).map_err(|e| storage_error("Failed to serialize state", e))?;
        self.state
            .insert(key.as_bytes(), bytes)
            .map_err(|e| storage_error("Failed to put state", e))?;
        Ok(())
    }

    pub fn get_state<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self
            .state
            .get(key.as_bytes())
            .map_err(|e| storage_error("Failed to get state", e))?
        {
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| storage_error("Failed to deserialize state", e)),
            None => Ok(None),
        }
    }

    /// Drop everything (full cache reset)
    pub fn clear(&self) -> Result<(), StoreError> {
        for tree in [&self.nodes, &self.documents, &self.state] {
            tree.clear()
                .map_err(|e| storage_error("Failed to clear tree", e))?;
        }
        Ok(())
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| storage_error("Failed to flush database", e))?;
        Ok(())
    }
}
