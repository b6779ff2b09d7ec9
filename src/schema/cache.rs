//! Example-value cache
//!
//! Keeps the last example value per node type and the hash of each printed inferred
//! type. A type is only re-inferred when flagged dirty, and reports a structural change
//! only when its example value (minus volatile fields) actually differs.

use crate::config::SchemaConfig;
use crate::hashing::{compute_canonical_hash, compute_hash};
use crate::schema::conflicts::TypeConflictReporter;
use crate::schema::example_value::{get_example_value, omit_fields, ExampleValue};
use crate::store::{NodeReader, NodeStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaCache {
    example_values: BTreeMap<String, ExampleValue>,
    /// node type -> hash of the example value
    example_value_hashes: BTreeMap<String, String>,
    /// node type -> hash of the printed inferred type
    inferred_type_shapes: BTreeMap<String, String>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the example value for a type, recomputing it if dirty or missing
    ///
    /// The second element is true when the stored example value changed.
    pub fn maybe_refresh_type(
        &mut self,
        type_name: &str,
        is_dirty: bool,
        store: &NodeStore,
        settings: &SchemaConfig,
        reporter: &mut TypeConflictReporter,
    ) -> (ExampleValue, bool) {
        if !is_dirty {
            if let Some(cached) = self.example_values.get(type_name) {
                return (cached.clone(), false);
            }
        }

        debug!(node_type = %type_name, "Collection dirty, creating example value");
        let nodes = store.get_nodes_by_type(type_name);
        let example = get_example_value(&nodes, type_name, &settings.ignore_fields, reporter);

        let volatile = settings
            .volatile_fields
            .get(type_name)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let new_hash = compute_canonical_hash(&omit_fields(&example, volatile));

        if nodes.is_empty() {
            let existed = self.example_values.remove(type_name).is_some();
            self.example_value_hashes.remove(type_name);
            self.inferred_type_shapes.remove(type_name);
            return (example, existed);
        }

        // volatile fields are kept in the cached value but never compared
        self.example_values
            .insert(type_name.to_string(), example.clone());
        let changed = self.example_value_hashes.get(type_name) != Some(&new_hash);
        if changed {
            debug!(node_type = %type_name, "Example value has changed");
            self.example_value_hashes
                .insert(type_name.to_string(), new_hash);
        }
        (example, changed)
    }

    pub fn example_value(&self, type_name: &str) -> Option<&ExampleValue> {
        self.example_values.get(type_name)
    }

    pub fn cached_types(&self) -> impl Iterator<Item = &String> {
        self.example_values.keys()
    }

    /// Record a printed type; returns true when its shape differs from the stored one
    pub fn save_type_if_changed(&mut self, type_name: &str, printed: &str) -> bool {
        let hash = compute_hash(printed.as_bytes());
        if self.inferred_type_shapes.get(type_name) == Some(&hash) {
            return false;
        }
        debug!(node_type = %type_name, "Saving inferred type");
        self.inferred_type_shapes
            .insert(type_name.to_string(), hash);
        true
    }

    /// Drop cached entries for types that no longer exist
    pub fn retain_types(&mut self, live: &[String]) -> Vec<String> {
        let gone: Vec<String> = self
            .inferred_type_shapes
            .keys()
            .chain(self.example_values.keys())
            .filter(|t| !live.contains(t))
            .cloned()
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        for t in &gone {
            self.example_values.remove(t);
            self.example_value_hashes.remove(t);
            self.inferred_type_shapes.remove(t);
        }
        gone
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
