//! Node Store
//!
//! Typed, indexed storage of content nodes. Nodes are grouped into type collections
//! keyed by `internal.type`; a collection is created lazily on the first node of its
//! type and only removed by an explicit prune or a full reset.
//!
//! Every successful mutation returns a [`Touched`] record. The caller feeds it to the
//! dirty tracker; the store itself never notifies anyone.

pub mod persistence;

pub use persistence::SledStateStore;

use crate::error::StoreError;
use crate::node::{Node, NodeId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Kind of mutation applied to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Created,
    Updated,
    Deleted,
}

/// What a store mutation touched
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Touched {
    pub node_id: NodeId,
    pub node_type: String,
    pub kind: MutationKind,
}

/// Read-only node access
///
/// This is the surface query executors and the worker RPC bridge get to see.
pub trait NodeReader {
    fn get_node(&self, id: &str) -> Option<&Node>;
    fn get_nodes_by_type(&self, node_type: &str) -> Vec<&Node>;
    fn get_all_nodes(&self) -> Vec<&Node>;

    /// True when the node is absent or its digest differs
    fn has_node_changed(&self, id: &str, digest: &str) -> bool {
        match self.get_node(id) {
            Some(node) => node.content_digest() != digest,
            None => true,
        }
    }
}

/// In-memory node store with type collections
#[derive(Debug, Default, Clone)]
pub struct NodeStore {
    nodes: HashMap<NodeId, Node>,
    collections: BTreeMap<String, BTreeSet<NodeId>>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new node
    ///
    /// Re-creating an existing id replaces the record, as long as the type is unchanged.
    pub fn create_node(&mut self, node: Node) -> Result<Touched, StoreError> {
        node.validate()?;
        self.ensure_same_type(&node, None)?;

        let node_type = node.node_type().to_string();
        let kind = if self.nodes.contains_key(&node.id) {
            MutationKind::Updated
        } else {
            MutationKind::Created
        };

        if !self.collections.contains_key(&node_type) {
            debug!(node_type = %node_type, "Creating node type collection");
        }
        self.collections
            .entry(node_type.clone())
            .or_default()
            .insert(node.id.clone());

        let node_id = node.id.clone();
        self.nodes.insert(node_id.clone(), node);

        Ok(Touched {
            node_id,
            node_type,
            kind,
        })
    }

    /// Replace a node with its complete new version
    ///
    /// The stored record is reset to its id before the new content is merged in, so no
    /// field of the old shape survives. `previous`, when given, is the record the caller
    /// believes is current; its type must match the new one.
    pub fn update_node(&mut self, node: Node, previous: Option<&Node>) -> Result<Touched, StoreError> {
        node.validate()?;
        self.ensure_same_type(&node, previous)?;

        let node_type = node.node_type().to_string();
        let node_id = node.id.clone();

        let mut record = self
            .nodes
            .remove(&node_id)
            .map(reset_to_bookkeeping)
            .unwrap_or_else(|| Node {
                id: node_id.clone(),
                ..Node::default()
            });
        record.parent = node.parent;
        record.children = node.children;
        record.internal = node.internal;
        record.fields = node.fields;

        self.collections
            .entry(node_type.clone())
            .or_default()
            .insert(node_id.clone());
        self.nodes.insert(node_id.clone(), record);

        Ok(Touched {
            node_id,
            node_type,
            kind: MutationKind::Updated,
        })
    }

    /// Remove a node; deleting an absent node is a no-op
    pub fn delete_node(&mut self, node: &Node) -> Result<Option<Touched>, StoreError> {
        node.validate()?;

        let Some(existing) = self.nodes.get(&node.id) else {
            return Ok(None);
        };
        if existing.node_type() != node.node_type() {
            return Err(StoreError::TypeChanged {
                id: node.id.clone(),
                from: existing.node_type().to_string(),
                to: node.node_type().to_string(),
            });
        }

        self.nodes.remove(&node.id);
        if let Some(collection) = self.collections.get_mut(node.node_type()) {
            collection.remove(&node.id);
        }

        Ok(Some(Touched {
            node_id: node.id.clone(),
            node_type: node.node_type().to_string(),
            kind: MutationKind::Deleted,
        }))
    }

    /// Known node types, including empty collections that have not been pruned
    pub fn types(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    pub fn has_collection(&self, node_type: &str) -> bool {
        self.collections.contains_key(node_type)
    }

    /// Drop every empty type collection; returns the removed type names
    pub fn prune_empty_collections(&mut self) -> Vec<String> {
        let empty: Vec<String> = self
            .collections
            .iter()
            .filter(|(_, ids)| ids.is_empty())
            .map(|(t, _)| t.clone())
            .collect();
        for node_type in &empty {
            self.collections.remove(node_type);
        }
        empty
    }

    /// Remove every node and collection
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.collections.clear();
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn ensure_same_type(&self, node: &Node, previous: Option<&Node>) -> Result<(), StoreError> {
        let existing_type = previous
            .map(|p| p.node_type())
            .or_else(|| self.nodes.get(&node.id).map(|n| n.node_type()));
        match existing_type {
            Some(existing) if existing != node.node_type() => Err(StoreError::TypeChanged {
                id: node.id.clone(),
                from: existing.to_string(),
                to: node.node_type().to_string(),
            }),
            _ => Ok(()),
        }
    }
}

fn reset_to_bookkeeping(node: Node) -> Node {
    Node {
        id: node.id,
        ..Node::default()
    }
}

impl NodeReader for NodeStore {
    fn get_node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    fn get_nodes_by_type(&self, node_type: &str) -> Vec<&Node> {
        self.collections
            .get(node_type)
            .map(|ids| ids.iter().filter_map(|id| self.nodes.get(id)).collect())
            .unwrap_or_default()
    }

    fn get_all_nodes(&self) -> Vec<&Node> {
        let mut nodes: Vec<&Node> = self.nodes.values().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }
}
