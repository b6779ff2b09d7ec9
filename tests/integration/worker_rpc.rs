//! Integration tests for the worker channel: field calls out, parent API calls back

use super::test_utils::apply_all;
use async_trait::async_trait;
use serde_json::{json, Value};
use sitegraph::actions::Action;
use sitegraph::error::BuildError;
use sitegraph::node::Node;
use sitegraph::schema::WorkerField;
use sitegraph::worker::child::{run_worker, WorkerSettings};
use sitegraph::worker::resolvers::ResolveContext;
use sitegraph::worker::{FieldDispatcher, FieldResolver, ParentApi, ResolveRequest, ResolverRegistry, WorkerPool};
use sitegraph::SiteState;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Returns whatever the parent answers for `getNode` on the resolved node
struct NodeEcho;

#[async_trait]
impl FieldResolver for NodeEcho {
    fn plugin(&self) -> &'static str {
        "node-echo"
    }

    fn fields(&self) -> Vec<WorkerField> {
        vec![WorkerField::new(self.plugin(), "echo", "JSON")]
    }

    async fn resolve(
        &self,
        _field: &str,
        node: &Node,
        _options: &Value,
        ctx: &ResolveContext<'_>,
    ) -> Result<Value, BuildError> {
        ctx.parent.call("getNode", json!([node.id])).await
    }
}

/// Pool of `workers` in-memory workers over duplex channels
fn connect_pool(temp_dir: &TempDir, state: SiteState, registry: ResolverRegistry, workers: usize) -> WorkerPool {
    let mut connections = Vec::new();
    for index in 0..workers {
        let (parent_end, worker_end) = tokio::io::duplex(64 * 1024);
        let (worker_reader, worker_writer) = tokio::io::split(worker_end);
        let settings = WorkerSettings {
            cache_dir: temp_dir.path().join(format!("derived-{}", index)),
            path_prefix: String::new(),
            rpc_timeout: Duration::from_secs(5),
        };
        let registry = registry.clone();
        tokio::spawn(async move {
            run_worker(worker_reader, worker_writer, registry, settings).await
        });
        connections.push(tokio::io::split(parent_end));
    }
    WorkerPool::connect(connections, ParentApi::new(state), Duration::from_secs(5))
}

fn request(plugin: &str, field: &str, node: Node) -> ResolveRequest {
    ResolveRequest {
        plugin: plugin.to_string(),
        type_name: node.node_type().to_string(),
        field_name: field.to_string(),
        node,
        options: Value::Null,
    }
}

#[tokio::test]
async fn test_worker_get_node_matches_parent_read() {
    let temp_dir = TempDir::new().unwrap();
    let state = SiteState::new();
    let node = Node::new("a", "Post", "d1")
        .with_field("title", json!("Hello"))
        .with_field("tags", json!(["x", "y"]));
    apply_all(&state, vec![Action::CreateNode(node.clone())]);

    let mut registry = ResolverRegistry::new();
    registry.register(Arc::new(NodeEcho));
    let pool = connect_pool(&temp_dir, state.clone(), registry, 2);

    let echoed = pool.resolve(request("node-echo", "echo", node.clone())).await.unwrap();
    let local = ParentApi::new(state).call("getNode", &json!(["a"])).unwrap();
    assert_eq!(echoed, local);
    assert_eq!(echoed, node.to_value());

    pool.shutdown().await;
}

#[tokio::test]
async fn test_worker_reads_parent_body_for_word_count() {
    let temp_dir = TempDir::new().unwrap();
    let state = SiteState::new();
    let file = Node::new("file-a", "File", "f1").with_field("body", json!("the quick brown fox jumps"));
    apply_all(&state, vec![Action::CreateNode(file)]);
    let child = Node::new("file-a#markdown", "MarkdownRemark", "f1").with_parent("file-a");

    let pool = connect_pool(&temp_dir, state, ResolverRegistry::builtin(), 3);
    let words = pool
        .resolve(request("text-stats", "wordCount", child.clone()))
        .await
        .unwrap();
    assert_eq!(words, json!(5));
    let minutes = pool.resolve(request("text-stats", "timeToRead", child)).await.unwrap();
    assert_eq!(minutes, json!(1));

    pool.shutdown().await;
}

#[tokio::test]
async fn test_unknown_field_error_names_plugin_and_field() {
    let temp_dir = TempDir::new().unwrap();
    let pool = connect_pool(&temp_dir, SiteState::new(), ResolverRegistry::builtin(), 1);

    let err = pool
        .resolve(request("text-stats", "sentiment", Node::new("a", "Post", "d1")))
        .await
        .unwrap_err();
    match err {
        BuildError::WorkerRpc {
            plugin,
            type_name,
            field_name,
            ..
        } => {
            assert_eq!(plugin, "text-stats");
            assert_eq!(type_name, "Post");
            assert_eq!(field_name, "sentiment");
        }
        other => panic!("expected worker error, got {:?}", other),
    }

    pool.shutdown().await;
}

#[tokio::test]
async fn test_path_dependency_call_records_edge() {
    let state = SiteState::new();
    apply_all(&state, vec![Action::CreateNode(Node::new("a", "Post", "d1"))]);
    let api = ParentApi::new(state.clone());

    let value = api
        .call("getNodeAndSavePathDependency", &json!(["a", "/a/"]))
        .unwrap();
    assert_eq!(value["id"], "a");

    let known = ["/a/".to_string()].into_iter().collect();
    let dirty = state.graph.lock().compute_dirty_query_ids(
        &["a".to_string()].into_iter().collect(),
        &["Post".to_string()].into_iter().collect(),
        &known,
    );
    assert!(dirty.contains("/a/"));
}
