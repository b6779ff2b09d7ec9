//! Example values
//!
//! An example value is the structural summary of a node type: the union of field shapes
//! across every node of that type. Only shapes are kept, never content, so content-only
//! churn produces an identical example value.

use crate::node::Node;
use crate::schema::conflicts::{TypeConflict, TypeConflictReporter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Shape of a single field value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldShape {
    Boolean,
    Int,
    Float,
    String,
    /// Homogeneous list; the element shape is the merge of all elements
    List(Box<FieldShape>),
    Object(BTreeMap<String, FieldShape>),
}

impl fmt::Display for FieldShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldShape::Boolean => write!(f, "boolean"),
            FieldShape::Int => write!(f, "int"),
            FieldShape::Float => write!(f, "float"),
            FieldShape::String => write!(f, "string"),
            FieldShape::List(inner) => write!(f, "[{}]", inner),
            FieldShape::Object(_) => write!(f, "object"),
        }
    }
}

/// Field name -> merged shape, for one node type
pub type ExampleValue = BTreeMap<String, FieldShape>;

/// Shape of a JSON value; `None` for values that carry no shape information
/// (null, empty lists, lists whose elements conflict)
pub fn shape_of(value: &Value) -> Option<FieldShape> {
    match value {
        Value::Null => None,
        Value::Bool(_) => Some(FieldShape::Boolean),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(FieldShape::Int),
        Value::Number(_) => Some(FieldShape::Float),
        Value::String(_) => Some(FieldShape::String),
        Value::Array(items) => {
            let mut merged: Option<FieldShape> = None;
            for item in items {
                let Some(shape) = shape_of(item) else { continue };
                merged = match merged {
                    None => Some(shape),
                    Some(prev) => Some(merge_quiet(prev, shape)?),
                };
            }
            merged.map(|inner| FieldShape::List(Box::new(inner)))
        }
        Value::Object(map) => {
            let fields: BTreeMap<String, FieldShape> = map
                .iter()
                .filter_map(|(k, v)| shape_of(v).map(|s| (k.clone(), s)))
                .collect();
            Some(FieldShape::Object(fields))
        }
    }
}

/// Merge without reporting; used for list elements
fn merge_quiet(a: FieldShape, b: FieldShape) -> Option<FieldShape> {
    let mut scratch = Vec::new();
    merge_shapes("", a, b, &mut scratch, &mut BTreeSet::new())
}

/// Widen two shapes into one
///
/// Int and Float widen to Float; objects merge key-wise. Any other mismatch is a
/// conflict: the path is recorded and `None` returned. Conflicts nested inside an object
/// only drop the nested key, and the key's path goes into `conflicted` so no later node
/// can bring it back with yet another shape.
fn merge_shapes(
    path: &str,
    a: FieldShape,
    b: FieldShape,
    conflicts: &mut Vec<(String, String, String)>,
    conflicted: &mut BTreeSet<String>,
) -> Option<FieldShape> {
    match (a, b) {
        (a, b) if a == b => Some(a),
        (FieldShape::Int, FieldShape::Float) | (FieldShape::Float, FieldShape::Int) => {
            Some(FieldShape::Float)
        }
        (FieldShape::List(a), FieldShape::List(b)) => {
            merge_shapes(&format!("{}[]", path), *a, *b, conflicts, conflicted)
                .map(|s| FieldShape::List(Box::new(s)))
        }
        (FieldShape::Object(mut a), FieldShape::Object(b)) => {
            for (key, b_shape) in b {
                let key_path = format!("{}.{}", path, key);
                if conflicted.contains(&key_path) {
                    continue;
                }
                let merged = match a.remove(&key) {
                    None => Some(b_shape),
                    Some(a_shape) => merge_shapes(&key_path, a_shape, b_shape, conflicts, conflicted),
                };
                match merged {
                    Some(shape) => {
                        a.insert(key, shape);
                    }
                    None => {
                        conflicted.insert(key_path);
                    }
                }
            }
            Some(FieldShape::Object(a))
        }
        (a, b) => {
            conflicts.push((path.to_string(), a.to_string(), b.to_string()));
            None
        }
    }
}

/// Compute the example value for a type from all of its nodes
///
/// Fields named in `ignore_fields` (and the node interface fields, which never appear in
/// `Node::fields`) are skipped. A conflicting field is reported and excluded for the rest
/// of the merge, at the top level or nested inside an object, so it never narrows to
/// whichever node came first or last.
pub fn get_example_value(
    nodes: &[&Node],
    type_name: &str,
    ignore_fields: &[String],
    reporter: &mut TypeConflictReporter,
) -> ExampleValue {
    let mut example = ExampleValue::new();
    let mut conflicted: BTreeSet<String> = BTreeSet::new();

    for node in nodes {
        for (field, value) in &node.fields {
            if ignore_fields.iter().any(|f| f == field) || conflicted.contains(field) {
                continue;
            }
            let Some(shape) = shape_of(value) else { continue };

            let merged = match example.remove(field) {
                None => Some(shape),
                Some(existing) => {
                    let mut found = Vec::new();
                    let merged = merge_shapes(field, existing, shape, &mut found, &mut conflicted);
                    for (path, left, right) in found {
                        reporter.add(TypeConflict {
                            type_name: type_name.to_string(),
                            field_path: path,
                            shapes: vec![left, right],
                            node_id: node.id.clone(),
                        });
                    }
                    if merged.is_none() {
                        conflicted.insert(field.clone());
                    }
                    merged
                }
            };
            if let Some(shape) = merged {
                example.insert(field.clone(), shape);
            }
        }
    }

    example
}

/// Copy of an example value without the given top-level fields
pub fn omit_fields(example: &ExampleValue, omit: &[String]) -> ExampleValue {
    example
        .iter()
        .filter(|(k, _)| !omit.iter().any(|o| o == *k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
