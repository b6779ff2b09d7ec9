//! Schema inference
//!
//! The schema is a read-only snapshot of every node type: its example value, the
//! worker-resolved fields plugins attach to it, and its printed shape. Queries validate
//! field selections against it.

pub mod cache;
pub mod conflicts;
pub mod example_value;

pub use cache::SchemaCache;
pub use conflicts::{TypeConflict, TypeConflictReporter};
pub use example_value::{ExampleValue, FieldShape};

use crate::config::SchemaConfig;
use crate::node::NODE_INTERFACE_FIELDS;
use crate::store::{NodeReader, NodeStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info};

/// A field whose value is computed by a plugin in the resolver worker pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerField {
    pub plugin: String,
    pub field_name: String,
    /// GraphQL-style return type, printed into the type definition
    pub return_type: String,
    /// Plugin options that affect the output; part of the cache key
    #[serde(default)]
    pub options: Value,
}

impl WorkerField {
    pub fn new(plugin: impl Into<String>, field_name: impl Into<String>, return_type: impl Into<String>) -> Self {
        WorkerField {
            plugin: plugin.into(),
            field_name: field_name.into(),
            return_type: return_type.into(),
            options: Value::Null,
        }
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    pub name: String,
    pub example_value: ExampleValue,
    pub worker_fields: Vec<WorkerField>,
    pub printed: String,
}

/// Immutable schema snapshot shared with running queries
#[derive(Debug, Clone, Default)]
pub struct Schema {
    types: BTreeMap<String, TypeDef>,
}

impl Schema {
    pub fn has_type(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    pub fn get_type(&self, type_name: &str) -> Option<&TypeDef> {
        self.types.get(type_name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &String> {
        self.types.keys()
    }

    /// Whether a type exposes a field, counting interface, inferred and worker fields
    pub fn has_field(&self, type_name: &str, field: &str) -> bool {
        let Some(def) = self.types.get(type_name) else {
            return false;
        };
        NODE_INTERFACE_FIELDS.contains(&field)
            || def.example_value.contains_key(field)
            || def.worker_fields.iter().any(|w| w.field_name == field)
    }

    pub fn worker_field(&self, type_name: &str, field: &str) -> Option<&WorkerField> {
        self.types
            .get(type_name)?
            .worker_fields
            .iter()
            .find(|w| w.field_name == field)
    }

    /// Full printed schema
    pub fn print(&self) -> String {
        self.types
            .values()
            .map(|t| t.printed.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Outcome of refreshing the schema for one pass
#[derive(Debug, Clone)]
pub struct SchemaRefresh {
    pub schema: Arc<Schema>,
    /// At least one type's structure changed; every query must be re-validated
    pub rebuilt: bool,
    pub changed_types: Vec<String>,
}

/// Re-infer dirty types and build a fresh schema snapshot
pub fn refresh_schema(
    cache: &mut SchemaCache,
    store: &NodeStore,
    dirty_types: &BTreeSet<String>,
    worker_fields: &BTreeMap<String, Vec<WorkerField>>,
    settings: &SchemaConfig,
) -> SchemaRefresh {
    let mut reporter = TypeConflictReporter::new();
    let mut types = BTreeMap::new();
    let mut changed_types = Vec::new();

    let live_types = store.types();
    for type_name in &live_types {
        let (example, structure_changed) = cache.maybe_refresh_type(
            type_name,
            dirty_types.contains(type_name),
            store,
            settings,
            &mut reporter,
        );
        if store.get_nodes_by_type(type_name).is_empty() {
            if structure_changed {
                changed_types.push(type_name.clone());
            }
            continue;
        }
        let fields = worker_fields.get(type_name).cloned().unwrap_or_default();
        let volatile = settings
            .volatile_fields
            .get(type_name)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let printed = print_type(
            type_name,
            &example_value::omit_fields(&example, volatile),
            &fields,
        );
        let printed_changed = cache.save_type_if_changed(type_name, &printed);
        if structure_changed || printed_changed {
            changed_types.push(type_name.clone());
        }
        types.insert(
            type_name.clone(),
            TypeDef {
                name: type_name.clone(),
                example_value: example,
                worker_fields: fields,
                printed,
            },
        );
    }

    let removed = cache.retain_types(&types.keys().cloned().collect::<Vec<_>>());
    changed_types.extend(removed);
    reporter.print_conflicts();

    let rebuilt = !changed_types.is_empty();
    if rebuilt {
        info!(types = %changed_types.join(", "), "Schema changed, rebuilding");
    } else {
        debug!("Schema unchanged");
    }

    SchemaRefresh {
        schema: Arc::new(Schema { types }),
        rebuilt,
        changed_types,
    }
}

/// Print a type definition in SDL form
///
/// Nested objects become their own types named after the field path.
pub fn print_type(type_name: &str, example: &ExampleValue, worker_fields: &[WorkerField]) -> String {
    let mut out = String::new();
    let mut nested = Vec::new();
    let _ = writeln!(out, "type {} implements Node {{", type_name);
    let _ = writeln!(out, "  id: ID!");
    let _ = writeln!(out, "  parent: Node");
    let _ = writeln!(out, "  children: [Node!]!");
    let _ = writeln!(out, "  internal: Internal!");
    for (field, shape) in example {
        let _ = writeln!(out, "  {}: {}", field, shape_type_name(type_name, field, shape, &mut nested));
    }
    for worker in worker_fields {
        let _ = writeln!(out, "  {}: {}", worker.field_name, worker.return_type);
    }
    out.push_str("}\n");
    for (name, fields) in nested {
        out.push_str(&print_object(&name, &fields));
    }
    out
}

fn print_object(name: &str, fields: &BTreeMap<String, FieldShape>) -> String {
    let mut out = String::new();
    let mut nested = Vec::new();
    let _ = writeln!(out, "type {} {{", name);
    for (field, shape) in fields {
        let _ = writeln!(out, "  {}: {}", field, shape_type_name(name, field, shape, &mut nested));
    }
    out.push_str("}\n");
    for (inner, inner_fields) in nested {
        out.push_str(&print_object(&inner, &inner_fields));
    }
    out
}

fn shape_type_name(
    parent: &str,
    field: &str,
    shape: &FieldShape,
    nested: &mut Vec<(String, BTreeMap<String, FieldShape>)>,
) -> String {
    match shape {
        FieldShape::Boolean => "Boolean".to_string(),
        FieldShape::Int => "Int".to_string(),
        FieldShape::Float => "Float".to_string(),
        FieldShape::String => "String".to_string(),
        FieldShape::List(inner) => format!("[{}]", shape_type_name(parent, field, inner, nested)),
        FieldShape::Object(fields) => {
            let name = format!("{}{}", parent, pascal_case(field));
            nested.push((name.clone(), fields.clone()));
            name
        }
    }
}

fn pascal_case(field: &str) -> String {
    field
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| {
            let mut chars = s.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}
