//! Field resolvers
//!
//! Resolvers compute worker fields from a node. They run inside worker processes (or
//! in-process through [`LocalResolvers`]) and reach main-process state only through
//! [`ParentCalls`].

use super::api::ParentApi;
use super::cache::{cache_key, DerivedCache};
use super::{FieldDispatcher, ResolveRequest};
use crate::error::BuildError;
use crate::markdown::{parse_headings, render_table_of_contents};
use crate::node::Node;
use crate::schema::WorkerField;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

const AVERAGE_WORDS_PER_MINUTE: usize = 265;

/// Main-process operations available to a resolver
#[async_trait]
pub trait ParentCalls: Send + Sync {
    async fn call(&self, name: &str, args: Value) -> Result<Value, BuildError>;

    /// Fire-and-forget log line in the main process
    fn report(&self, fn_name: &str, message: &str);
}

#[async_trait]
impl ParentCalls for ParentApi {
    async fn call(&self, name: &str, args: Value) -> Result<Value, BuildError> {
        ParentApi::call(self, name, &args)
    }

    fn report(&self, fn_name: &str, message: &str) {
        let _ = ParentApi::call(self, "reporter", &json!({"fnName": fn_name, "args": [message]}));
    }
}

pub struct ResolveContext<'a> {
    pub parent: &'a dyn ParentCalls,
    pub cache: &'a DerivedCache,
    /// Names of every loaded resolver plugin; part of each cache key
    pub plugins: &'a [String],
    pub path_prefix: &'a str,
}

#[async_trait]
pub trait FieldResolver: Send + Sync {
    fn plugin(&self) -> &'static str;

    /// Fields this plugin adds, with their default options
    fn fields(&self) -> Vec<WorkerField>;

    async fn resolve(
        &self,
        field: &str,
        node: &Node,
        options: &Value,
        ctx: &ResolveContext<'_>,
    ) -> Result<Value, BuildError>;
}

/// Resolver plugins by name
#[derive(Clone, Default)]
pub struct ResolverRegistry {
    resolvers: BTreeMap<String, Arc<dyn FieldResolver>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `text-stats` and `headings`
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TextStats));
        registry.register(Arc::new(Headings));
        registry
    }

    pub fn register(&mut self, resolver: Arc<dyn FieldResolver>) {
        self.resolvers.insert(resolver.plugin().to_string(), resolver);
    }

    pub fn plugin_names(&self) -> Vec<String> {
        self.resolvers.keys().cloned().collect()
    }

    /// Worker fields of the named plugins; unknown names are skipped
    pub fn worker_fields(&self, plugins: &[String]) -> Vec<WorkerField> {
        plugins
            .iter()
            .filter_map(|name| self.resolvers.get(name))
            .flat_map(|resolver| resolver.fields())
            .collect()
    }

    pub async fn resolve(&self, request: &ResolveRequest, ctx: &ResolveContext<'_>) -> Result<Value, BuildError> {
        let resolver = self
            .resolvers
            .get(&request.plugin)
            .ok_or_else(|| field_error(request, "plugin is not loaded in this worker"))?;
        if !resolver
            .fields()
            .iter()
            .any(|f| f.field_name == request.field_name)
        {
            return Err(field_error(request, "plugin does not resolve this field"));
        }
        resolver
            .resolve(&request.field_name, &request.node, &request.options, ctx)
            .await
    }
}

pub(crate) fn field_error(request: &ResolveRequest, message: impl Into<String>) -> BuildError {
    BuildError::WorkerRpc {
        plugin: request.plugin.clone(),
        type_name: request.type_name.clone(),
        field_name: request.field_name.clone(),
        message: message.into(),
    }
}

/// Keep field-level errors, wrap anything else with the field identity
pub(crate) fn attribute_error(request: &ResolveRequest, err: BuildError) -> BuildError {
    match err {
        BuildError::WorkerRpc { .. } | BuildError::WorkerTimeout { .. } => err,
        other => field_error(request, other.to_string()),
    }
}

/// Text of `field` on the node, falling back to the parent node for transformer children
async fn source_text(node: &Node, field: &str, ctx: &ResolveContext<'_>) -> Result<String, BuildError> {
    if let Some(Value::String(text)) = node.fields.get(field) {
        return Ok(text.clone());
    }
    let Some(parent_id) = &node.parent else {
        ctx.parent.report(
            "warn",
            &format!("node {} has no \"{}\" text to analyse", node.id, field),
        );
        return Ok(String::new());
    };
    let parent = ctx.parent.call("getNode", json!([parent_id])).await?;
    Ok(parent
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string())
}

fn text_field(options: &Value) -> &str {
    options.get("field").and_then(Value::as_str).unwrap_or("body")
}

/// `wordCount` and `timeToRead`
pub struct TextStats;

#[async_trait]
impl FieldResolver for TextStats {
    fn plugin(&self) -> &'static str {
        "text-stats"
    }

    fn fields(&self) -> Vec<WorkerField> {
        vec![
            WorkerField::new(self.plugin(), "wordCount", "Int"),
            WorkerField::new(self.plugin(), "timeToRead", "Int"),
        ]
    }

    async fn resolve(
        &self,
        field: &str,
        node: &Node,
        options: &Value,
        ctx: &ResolveContext<'_>,
    ) -> Result<Value, BuildError> {
        let key = cache_key(
            "text-stats-words",
            node.content_digest(),
            ctx.plugins,
            ctx.path_prefix,
            None,
        );
        let words = ctx
            .cache
            .get_or_compute(&key, || async move {
                let text = source_text(node, text_field(options), ctx).await?;
                Ok(json!(text.split_whitespace().count()))
            })
            .await?;
        let words = words.as_u64().unwrap_or(0) as usize;

        match field {
            "wordCount" => Ok(json!(words)),
            _ => {
                let minutes = ((words as f64) / AVERAGE_WORDS_PER_MINUTE as f64).round() as usize;
                Ok(json!(minutes.max(1)))
            }
        }
    }
}

/// `headings` and the option-sensitive `tableOfContents`
pub struct Headings;

#[async_trait]
impl FieldResolver for Headings {
    fn plugin(&self) -> &'static str {
        "headings"
    }

    fn fields(&self) -> Vec<WorkerField> {
        vec![
            WorkerField::new(self.plugin(), "headings", "[MarkdownHeading]"),
            WorkerField::new(self.plugin(), "tableOfContents", "String")
                .with_options(json!({"maxDepth": 6, "pathToSlugField": "slug"})),
        ]
    }

    async fn resolve(
        &self,
        field: &str,
        node: &Node,
        options: &Value,
        ctx: &ResolveContext<'_>,
    ) -> Result<Value, BuildError> {
        match field {
            "headings" => {
                let key = cache_key(
                    "headings-list",
                    node.content_digest(),
                    ctx.plugins,
                    ctx.path_prefix,
                    None,
                );
                ctx.cache
                    .get_or_compute(&key, || async move {
                        let text = source_text(node, text_field(options), ctx).await?;
                        let headings: Vec<Value> = parse_headings(&text)
                            .into_iter()
                            .map(|h| json!({"value": h.value, "depth": h.depth, "id": h.anchor}))
                            .collect();
                        Ok(Value::Array(headings))
                    })
                    .await
            }
            _ => {
                let key = cache_key(
                    "headings-toc",
                    node.content_digest(),
                    ctx.plugins,
                    ctx.path_prefix,
                    Some(options),
                );
                ctx.cache
                    .get_or_compute(&key, || async move {
                        let text = source_text(node, text_field(options), ctx).await?;
                        let max_depth = options
                            .get("maxDepth")
                            .and_then(Value::as_u64)
                            .unwrap_or(6)
                            .min(6) as u8;
                        let slug_field = options
                            .get("pathToSlugField")
                            .and_then(Value::as_str)
                            .unwrap_or("slug");
                        let slug = node
                            .get_field(slug_field)
                            .and_then(|v| v.as_str().map(str::to_string))
                            .unwrap_or_default();
                        let base = format!("{}{}", ctx.path_prefix, slug);
                        Ok(json!(render_table_of_contents(
                            &parse_headings(&text),
                            &base,
                            max_depth
                        )))
                    })
                    .await
            }
        }
    }
}

/// In-process dispatcher over a resolver registry
pub struct LocalResolvers {
    registry: ResolverRegistry,
    plugins: Vec<String>,
    api: ParentApi,
    cache: DerivedCache,
    path_prefix: String,
}

impl LocalResolvers {
    pub fn new(registry: ResolverRegistry, api: ParentApi, cache: DerivedCache, path_prefix: impl Into<String>) -> Self {
        LocalResolvers {
            plugins: registry.plugin_names(),
            registry,
            api,
            cache,
            path_prefix: path_prefix.into(),
        }
    }
}

#[async_trait]
impl FieldDispatcher for LocalResolvers {
    async fn resolve(&self, request: ResolveRequest) -> Result<Value, BuildError> {
        let ctx = ResolveContext {
            parent: &self.api,
            cache: &self.cache,
            plugins: &self.plugins,
            path_prefix: &self.path_prefix,
        };
        self.registry
            .resolve(&request, &ctx)
            .await
            .map_err(|e| attribute_error(&request, e))
    }
}
