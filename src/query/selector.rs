//! Built-in selector executor
//!
//! A small JSON query language over the node store:
//!
//! ```json
//! {"node": {"type": "Post", "id": "$id"}, "fields": ["title", "frontmatter.date"]}
//! {"all": "Post", "filter": {"draft": false}, "sort": "-date", "limit": 10, "fields": ["title"]}
//! ```
//!
//! A query may also be an array of selectors. Each selector's result lands under its
//! `as` key (default `node` / `nodes`). Single-node reads declare a node dependency,
//! collection reads a type dependency.

use super::{QueryExecutor, QueryRequest, QueryResult};
use crate::error::BuildError;
use crate::node::Node;
use crate::store::NodeReader;
use crate::worker::{FieldDispatcher, ResolveRequest};
use async_trait::async_trait;
use futures::future::try_join_all;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QueryDocument {
    Many(Vec<Selector>),
    One(Selector),
}

impl QueryDocument {
    fn into_selectors(self) -> Vec<Selector> {
        match self {
            QueryDocument::Many(selectors) => selectors,
            QueryDocument::One(selector) => vec![selector],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Selector {
    One {
        node: NodeSelector,
        #[serde(default)]
        fields: Vec<String>,
        #[serde(default, rename = "as")]
        alias: Option<String>,
    },
    All {
        all: String,
        #[serde(default)]
        filter: Map<String, Value>,
        #[serde(default)]
        sort: Option<String>,
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default)]
        fields: Vec<String>,
        #[serde(default, rename = "as")]
        alias: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct NodeSelector {
    #[serde(rename = "type")]
    node_type: String,
    id: String,
}

#[derive(Default)]
pub struct SelectorExecutor {
    dispatcher: Option<Arc<dyn FieldDispatcher>>,
}

impl SelectorExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve worker fields through `dispatcher`
    pub fn with_dispatcher(dispatcher: Arc<dyn FieldDispatcher>) -> Self {
        SelectorExecutor {
            dispatcher: Some(dispatcher),
        }
    }

    async fn run_selector(
        &self,
        selector: Selector,
        request: &QueryRequest<'_>,
        errors: &mut Vec<String>,
    ) -> Result<Option<(String, Value)>, BuildError> {
        match selector {
            Selector::One { node, fields, alias } => {
                if !validate_selection(request, &node.node_type, &fields, None, errors) {
                    return Ok(None);
                }
                let Some(id) = resolve_variable(&node.id, &request.job.context, errors) else {
                    return Ok(None);
                };
                // declared even when the node is missing, so creating it invalidates the query
                request.recorder.declare_node_dependency(&request.job.id, &id);
                let found = request.nodes.read().get_node(&id).cloned();
                let value = match found {
                    Some(found) if found.node_type() == node.node_type => {
                        self.project(&found, &fields, request).await?
                    }
                    _ => Value::Null,
                };
                Ok(Some((alias.unwrap_or_else(|| "node".to_string()), value)))
            }
            Selector::All {
                all,
                filter,
                sort,
                limit,
                fields,
                alias,
            } => {
                let mut referenced: Vec<&str> = filter.keys().map(String::as_str).collect();
                if let Some(sort) = &sort {
                    referenced.push(sort.trim_start_matches('-'));
                }
                if !validate_selection(request, &all, &fields, Some(&referenced), errors) {
                    return Ok(None);
                }
                request.recorder.declare_type_dependency(&request.job.id, &all);

                let mut nodes: Vec<Node> = request
                    .nodes
                    .read()
                    .get_nodes_by_type(&all)
                    .into_iter()
                    .cloned()
                    .collect();
                nodes.retain(|node| {
                    filter
                        .iter()
                        .all(|(path, expected)| field_path(node, path).as_ref() == Some(expected))
                });
                if let Some(sort) = &sort {
                    let descending = sort.starts_with('-');
                    let key = sort.trim_start_matches('-');
                    nodes.sort_by(|a, b| {
                        let ordering = compare_values(&field_path(a, key), &field_path(b, key));
                        if descending {
                            ordering.reverse()
                        } else {
                            ordering
                        }
                    });
                }
                if let Some(limit) = limit {
                    nodes.truncate(limit);
                }

                // nodes shard across workers, so their worker fields resolve in parallel
                let projected =
                    try_join_all(nodes.iter().map(|node| self.project(node, &fields, request))).await?;
                Ok(Some((
                    alias.unwrap_or_else(|| "nodes".to_string()),
                    Value::Array(projected),
                )))
            }
        }
    }

    async fn project(&self, node: &Node, fields: &[String], request: &QueryRequest<'_>) -> Result<Value, BuildError> {
        if fields.is_empty() {
            return Ok(node.to_value());
        }
        let mut out = Map::new();
        for field in fields {
            let mut segments = field.split('.');
            let top = segments.next().unwrap_or_default();
            let rest: Vec<&str> = segments.collect();

            let value = match request.schema.worker_field(node.node_type(), top) {
                Some(worker_field) => {
                    let dispatcher = self.dispatcher.as_ref().ok_or_else(|| BuildError::WorkerRpc {
                        plugin: worker_field.plugin.clone(),
                        type_name: node.node_type().to_string(),
                        field_name: top.to_string(),
                        message: "no resolver dispatcher configured".to_string(),
                    })?;
                    dispatcher
                        .resolve(ResolveRequest {
                            plugin: worker_field.plugin.clone(),
                            type_name: node.node_type().to_string(),
                            field_name: top.to_string(),
                            node: node.clone(),
                            options: worker_field.options.clone(),
                        })
                        .await?
                }
                None => node.get_field(top).unwrap_or(Value::Null),
            };
            let value = descend(&value, &rest).unwrap_or(Value::Null);
            insert_path(&mut out, field, value);
        }
        Ok(Value::Object(out))
    }
}

#[async_trait]
impl QueryExecutor for SelectorExecutor {
    async fn execute(&self, request: QueryRequest<'_>) -> Result<QueryResult, BuildError> {
        let text = request.job.query.trim();
        if text.is_empty() {
            return Ok(QueryResult::data(Value::Object(Map::new())));
        }
        let document: QueryDocument = match serde_json::from_str(text) {
            Ok(document) => document,
            Err(e) => return Ok(QueryResult::error(format!("Syntax Error: {}", e))),
        };

        let mut data = Map::new();
        let mut errors = Vec::new();
        for selector in document.into_selectors() {
            if let Some((key, value)) = self.run_selector(selector, &request, &mut errors).await? {
                data.insert(key, value);
            }
        }
        Ok(QueryResult {
            data: Value::Object(data),
            errors,
        })
    }
}

/// Check the type and every referenced field against the schema
fn validate_selection(
    request: &QueryRequest<'_>,
    type_name: &str,
    fields: &[String],
    extra: Option<&[&str]>,
    errors: &mut Vec<String>,
) -> bool {
    if !request.schema.has_type(type_name) {
        errors.push(format!("Unknown type \"{}\".", type_name));
        return false;
    }
    let before = errors.len();
    let referenced = fields
        .iter()
        .map(String::as_str)
        .chain(extra.unwrap_or(&[]).iter().copied());
    for path in referenced {
        let top = path.split('.').next().unwrap_or_default();
        if !request.schema.has_field(type_name, top) {
            errors.push(format!(
                "Cannot query field \"{}\" on type \"{}\".",
                top, type_name
            ));
        }
    }
    errors.len() == before
}

/// `$name` reads a context variable; anything else is a literal
fn resolve_variable(raw: &str, context: &Value, errors: &mut Vec<String>) -> Option<String> {
    let Some(name) = raw.strip_prefix('$') else {
        return Some(raw.to_string());
    };
    match context.get(name) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => {
            errors.push(format!(
                "Variable \"${}\" of required type \"String!\" was not provided.",
                name
            ));
            None
        }
    }
}

fn field_path(node: &Node, path: &str) -> Option<Value> {
    let mut segments = path.split('.');
    let top = node.get_field(segments.next()?)?;
    descend(&top, &segments.collect::<Vec<_>>())
}

fn descend(value: &Value, segments: &[&str]) -> Option<Value> {
    let mut current = value;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(*segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

fn insert_path(out: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(last) = segments.pop() else {
        return;
    };
    let mut target = out;
    for segment in segments {
        let entry = target
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else {
            return;
        };
        target = next;
    }
    target.insert(last.to_string(), value);
}

fn compare_values(a: &Option<Value>, b: &Option<Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}
