//! Content nodes
//!
//! A node is a typed content record: the unit of storage and change detection.
//! `internal.content_digest` changes iff the node's semantic content changes.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type NodeId = String;

/// Store bookkeeping for a node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInternal {
    /// Node type; immutable once the node is created
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default)]
    pub content_digest: String,
    /// Name of the plugin that created the node
    #[serde(default)]
    pub owner: String,
}

/// A content record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub id: NodeId,
    #[serde(default)]
    pub parent: Option<NodeId>,
    #[serde(default)]
    pub children: Vec<NodeId>,
    #[serde(default)]
    pub internal: NodeInternal,
    /// User-facing fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Field names every node carries regardless of type; excluded from inference
pub const NODE_INTERFACE_FIELDS: &[&str] = &["id", "parent", "children", "internal"];

impl Node {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>, content_digest: impl Into<String>) -> Self {
        Node {
            id: id.into(),
            parent: None,
            children: Vec::new(),
            internal: NodeInternal {
                node_type: node_type.into(),
                content_digest: content_digest.into(),
                owner: String::new(),
            },
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.internal.owner = owner.into();
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn node_type(&self) -> &str {
        &self.internal.node_type
    }

    pub fn content_digest(&self) -> &str {
        &self.internal.content_digest
    }

    /// Reject nodes the store cannot index
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.id.is_empty() {
            return Err(StoreError::InvariantViolation(
                "node has no \"id\" field".to_string(),
            ));
        }
        if self.internal.node_type.is_empty() {
            return Err(StoreError::InvariantViolation(format!(
                "node {} has no \"internal.type\" field",
                self.id
            )));
        }
        Ok(())
    }

    /// Look up a field by name, including the interface fields
    pub fn get_field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::String(self.id.clone())),
            "parent" => self.parent.clone().map(Value::String),
            "children" => Some(Value::Array(
                self.children.iter().cloned().map(Value::String).collect(),
            )),
            "internal" => serde_json::to_value(&self.internal).ok(),
            _ => self.fields.get(name).cloned(),
        }
    }

    /// Serialize to a JSON value (the shape the worker RPC and artifacts see)
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
