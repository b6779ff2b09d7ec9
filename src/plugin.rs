//! Plugins
//!
//! A plugin is a capability set: it implements any subset of sourcing nodes, reacting
//! to created nodes, creating pages, and attaching worker-resolved fields to types.
//! Capabilities return [`Action`]s; the build driver applies them in declared plugin
//! order.
//!
//! Built-in plugins:
//! - [`JsonFileSource`]: nodes from `*.json` and `*.md` files under the content directory,
//!   pages, queries and redirects from `pages.json`
//! - [`MarkdownTransformer`]: a `MarkdownRemark` child for every markdown node
//! - [`ResolverFields`]: worker fields from the resolver registry, per configured type
//! - [`Prod404`]: a `/404.html` copy of the `/404/` page

use crate::actions::Action;
use crate::config::SiteConfig;
use crate::error::BuildError;
use crate::hashing::compute_canonical_hash;
use crate::markdown::parse_frontmatter;
use crate::node::Node;
use crate::pages::{PageDescriptor, Redirect, StaticQueryDescriptor};
use crate::schema::WorkerField;
use crate::store::{NodeReader, NodeStore};
use crate::worker::ResolverRegistry;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// What a source sees of the current store
pub struct SourceContext<'a> {
    pub config: &'a SiteConfig,
    /// Snapshot taken before sourcing started
    pub nodes: &'a NodeStore,
}

#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    async fn source_nodes(&self, _ctx: &SourceContext<'_>) -> Result<Vec<Action>, BuildError> {
        Ok(Vec::new())
    }

    /// Called for every created or updated node
    async fn on_create_node(&self, _node: &Node) -> Result<Vec<Action>, BuildError> {
        Ok(Vec::new())
    }

    async fn create_pages(&self, _nodes: &NodeStore) -> Result<Vec<Action>, BuildError> {
        Ok(Vec::new())
    }

    /// Called for every applied page creation, changed or not
    async fn on_create_page(&self, _page: &PageDescriptor) -> Result<Vec<Action>, BuildError> {
        Ok(Vec::new())
    }

    /// Fields of `type_name` resolved in the worker pool
    fn worker_fields(&self, _type_name: &str) -> Vec<WorkerField> {
        Vec::new()
    }
}

fn plugin_error(plugin: &str, message: impl Into<String>) -> BuildError {
    BuildError::Plugin {
        plugin: plugin.to_string(),
        message: message.into(),
    }
}

/// File name of the page manifest at the content root
pub const PAGE_MANIFEST: &str = "pages.json";

const JSON_SOURCE: &str = "json-source";

/// Nodes, pages and queries from files under the content directory
pub struct JsonFileSource {
    content_dir: PathBuf,
}

impl JsonFileSource {
    pub fn new(content_dir: impl Into<PathBuf>) -> Self {
        JsonFileSource {
            content_dir: content_dir.into(),
        }
    }

    /// Read every node file; ids default to the path relative to the content root
    pub fn read_nodes(&self) -> Result<Vec<Node>, BuildError> {
        let mut nodes = Vec::new();
        if !self.content_dir.exists() {
            warn!(dir = %self.content_dir.display(), "Content directory does not exist");
            return Ok(nodes);
        }
        let entries = WalkDir::new(&self.content_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable content entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file());

        for entry in entries {
            let path = entry.path();
            let relative = path
                .strip_prefix(&self.content_dir)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");
            if relative == PAGE_MANIFEST {
                continue;
            }
            match path.extension().and_then(|e| e.to_str()) {
                Some("json") => nodes.extend(self.read_json_file(path, &relative)?),
                Some("md") => nodes.push(self.read_markdown_file(path, &relative)?),
                _ => debug!(file = %relative, "Ignoring non-content file"),
            }
        }
        Ok(nodes)
    }

    fn read_json_file(&self, path: &Path, relative: &str) -> Result<Vec<Node>, BuildError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| plugin_error(JSON_SOURCE, format!("{}: {}", relative, e)))?;
        let value: Value = serde_json::from_str(&text)
            .map_err(|e| plugin_error(JSON_SOURCE, format!("{}: {}", relative, e)))?;
        let stem = relative.trim_end_matches(".json");
        match value {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| json_node(item, &format!("{}/{}", stem, i)))
                .collect(),
            other => Ok(vec![json_node(other, stem)?]),
        }
    }

    fn read_markdown_file(&self, path: &Path, relative: &str) -> Result<Node, BuildError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| plugin_error(JSON_SOURCE, format!("{}: {}", relative, e)))?;
        let (frontmatter, body) = parse_frontmatter(&text)
            .map_err(|e| plugin_error(JSON_SOURCE, format!("{}: {}", relative, e)))?;
        let slug = format!("/{}/", relative.trim_end_matches(".md").trim_end_matches("/index"));
        let mut node = Node::new(relative, "File", crate::hashing::compute_content_digest(text.as_bytes()))
            .with_owner(JSON_SOURCE)
            .with_field("relativePath", json!(relative))
            .with_field("format", json!("markdown"))
            .with_field("slug", json!(slug))
            .with_field("body", json!(body));
        if !frontmatter.is_empty() {
            node = node.with_field("frontmatter", Value::Object(frontmatter));
        }
        Ok(node)
    }

    async fn read_manifest(&self) -> Result<Option<PageManifest>, BuildError> {
        let path = self.content_dir.join(PAGE_MANIFEST);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(plugin_error(JSON_SOURCE, format!("{}: {}", PAGE_MANIFEST, e))),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| plugin_error(JSON_SOURCE, format!("{}: {}", PAGE_MANIFEST, e)))
    }
}

/// A JSON object as a node: either the full node shape or plain fields with a `type`
fn json_node(value: Value, default_id: &str) -> Result<Node, BuildError> {
    let digest = compute_canonical_hash(&value);
    let Value::Object(mut fields) = value else {
        return Err(plugin_error(JSON_SOURCE, format!("{} is not an object", default_id)));
    };
    if fields.contains_key("internal") {
        let mut node: Node = serde_json::from_value(Value::Object(fields))
            .map_err(|e| plugin_error(JSON_SOURCE, format!("{}: {}", default_id, e)))?;
        if node.id.is_empty() {
            node.id = default_id.to_string();
        }
        if node.internal.content_digest.is_empty() {
            node.internal.content_digest = digest;
        }
        node.internal.owner = JSON_SOURCE.to_string();
        return Ok(node);
    }

    let id = match fields.remove("id") {
        Some(Value::String(id)) => id,
        _ => default_id.to_string(),
    };
    let node_type = match fields.remove("type") {
        Some(Value::String(t)) => t,
        _ => {
            return Err(plugin_error(
                JSON_SOURCE,
                format!("{} has no \"type\" field", default_id),
            ))
        }
    };
    let parent = match fields.remove("parent") {
        Some(Value::String(parent)) => Some(parent),
        _ => None,
    };
    let mut node = Node::new(id, node_type, digest).with_owner(JSON_SOURCE);
    node.parent = parent;
    node.fields = fields;
    Ok(node)
}

/// `pages.json`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageManifest {
    /// component path -> page query (string or JSON selector)
    #[serde(default)]
    components: BTreeMap<String, Value>,
    #[serde(default)]
    static_queries: Vec<StaticQueryEntry>,
    #[serde(default)]
    pages: Vec<PageDescriptor>,
    /// One page per node of a type
    #[serde(default)]
    collections: Vec<CollectionEntry>,
    #[serde(default)]
    redirects: Vec<Redirect>,
}

#[derive(Debug, Deserialize)]
struct StaticQueryEntry {
    component: String,
    query: Value,
}

#[derive(Debug, Deserialize)]
struct CollectionEntry {
    #[serde(rename = "type")]
    node_type: String,
    component: String,
    /// Path template; `{field}` is replaced by the node's field value
    path: String,
}

fn query_text(query: Value) -> String {
    match query {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

fn expand_path_template(template: &str, node: &Node) -> String {
    let mut path = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        path.push_str(&rest[..start]);
        let Some(end) = rest[start..].find('}') else {
            path.push_str(&rest[start..]);
            return path;
        };
        let field = &rest[start + 1..start + end];
        let value = match node.get_field(field) {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        path.push_str(value.trim_matches('/'));
        rest = &rest[start + end + 1..];
    }
    path.push_str(rest);
    path
}

#[async_trait]
impl Plugin for JsonFileSource {
    fn name(&self) -> &str {
        JSON_SOURCE
    }

    async fn source_nodes(&self, ctx: &SourceContext<'_>) -> Result<Vec<Action>, BuildError> {
        let content_dir = self.content_dir.clone();
        let nodes = tokio::task::spawn_blocking(move || JsonFileSource::new(content_dir).read_nodes())
            .await
            .map_err(|e| plugin_error(JSON_SOURCE, format!("content scan panicked: {}", e)))??;

        let mut actions = Vec::new();
        let mut seen = BTreeSet::new();
        for node in nodes {
            seen.insert(node.id.clone());
            match ctx.nodes.get_node(&node.id) {
                None => actions.push(Action::CreateNode(node)),
                Some(existing) if existing.content_digest() == node.content_digest() => {}
                Some(existing) if existing.node_type() != node.node_type() => {
                    actions.push(Action::DeleteNode(existing.clone()));
                    actions.push(Action::CreateNode(node));
                }
                Some(existing) => actions.push(Action::UpdateNode {
                    node,
                    previous: Some(existing.clone()),
                }),
            }
        }
        for stale in ctx
            .nodes
            .get_all_nodes()
            .into_iter()
            .filter(|n| n.internal.owner == JSON_SOURCE && !seen.contains(&n.id))
        {
            actions.push(Action::DeleteNode(stale.clone()));
        }
        debug!(actions = actions.len(), "Sourced content files");
        Ok(actions)
    }

    async fn create_pages(&self, nodes: &NodeStore) -> Result<Vec<Action>, BuildError> {
        let Some(manifest) = self.read_manifest().await? else {
            return Ok(Vec::new());
        };
        let mut actions = Vec::new();
        for (component, query) in manifest.components {
            actions.push(Action::SetComponentQuery {
                component,
                query: query_text(query),
            });
        }
        for entry in manifest.static_queries {
            actions.push(Action::ReplaceStaticQuery(StaticQueryDescriptor::new(
                entry.component,
                query_text(entry.query),
            )));
        }
        for mut page in manifest.pages {
            page.owner = JSON_SOURCE.to_string();
            if page.component_chunk_name.is_empty() {
                page.component_chunk_name = crate::pages::chunk_name_for(&page.component);
            }
            actions.push(Action::CreatePage(page));
        }
        for collection in manifest.collections {
            for node in nodes.get_nodes_by_type(&collection.node_type) {
                let mut page = PageDescriptor::new(
                    expand_path_template(&collection.path, node),
                    collection.component.clone(),
                )
                .with_context(json!({"id": node.id}));
                page.owner = JSON_SOURCE.to_string();
                actions.push(Action::CreatePage(page));
            }
        }
        for redirect in manifest.redirects {
            actions.push(Action::CreateRedirect(redirect));
        }
        Ok(actions)
    }
}

const MARKDOWN_TRANSFORMER: &str = "markdown-transformer";

/// Creates a `MarkdownRemark` child for nodes with `format: "markdown"`
///
/// The child carries the frontmatter and slug; its text stays on the parent.
pub struct MarkdownTransformer;

#[async_trait]
impl Plugin for MarkdownTransformer {
    fn name(&self) -> &str {
        MARKDOWN_TRANSFORMER
    }

    async fn on_create_node(&self, node: &Node) -> Result<Vec<Action>, BuildError> {
        if node.fields.get("format").and_then(Value::as_str) != Some("markdown") {
            return Ok(Vec::new());
        }
        let mut child = Node::new(
            format!("{}#markdown", node.id),
            "MarkdownRemark",
            node.content_digest(),
        )
        .with_owner(MARKDOWN_TRANSFORMER)
        .with_parent(node.id.clone());
        for field in ["frontmatter", "slug"] {
            if let Some(value) = node.fields.get(field) {
                child = child.with_field(field, value.clone());
            }
        }
        Ok(vec![Action::CreateNode(child)])
    }
}

/// Attaches resolver plugin fields to configured node types
pub struct ResolverFields {
    registry: ResolverRegistry,
    by_type: BTreeMap<String, Vec<String>>,
}

impl ResolverFields {
    pub fn new(registry: ResolverRegistry, by_type: BTreeMap<String, Vec<String>>) -> Self {
        ResolverFields { registry, by_type }
    }
}

#[async_trait]
impl Plugin for ResolverFields {
    fn name(&self) -> &str {
        "resolver-fields"
    }

    fn worker_fields(&self, type_name: &str) -> Vec<WorkerField> {
        self.by_type
            .get(type_name)
            .map(|plugins| self.registry.worker_fields(plugins))
            .unwrap_or_default()
    }
}

const NOT_FOUND_PATH: &str = "/404/";
const NOT_FOUND_HTML_PATH: &str = "/404.html";

/// Copies the `/404/` page to `/404.html`, the name static hosts serve for missing paths
///
/// The copy keeps the owner of `/404/`, so both go stale together.
pub struct Prod404;

#[async_trait]
impl Plugin for Prod404 {
    fn name(&self) -> &str {
        "prod-404"
    }

    async fn on_create_page(&self, page: &PageDescriptor) -> Result<Vec<Action>, BuildError> {
        if page.path != NOT_FOUND_PATH {
            return Ok(Vec::new());
        }
        let mut copy = page.clone();
        copy.path = NOT_FOUND_HTML_PATH.to_string();
        Ok(vec![Action::CreatePage(copy)])
    }
}

/// The default plugin list for a site
pub fn default_plugins(config: &SiteConfig) -> Vec<std::sync::Arc<dyn Plugin>> {
    vec![
        std::sync::Arc::new(JsonFileSource::new(config.content_path())),
        std::sync::Arc::new(MarkdownTransformer),
        std::sync::Arc::new(ResolverFields::new(
            ResolverRegistry::builtin(),
            config.schema.resolvers.clone(),
        )),
        std::sync::Arc::new(Prod404),
    ]
}
