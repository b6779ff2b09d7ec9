//! Integration tests for schema rebuild gating

use super::test_utils::{plain_driver, post, post_page, POST_BY_ID};
use serde_json::json;
use sitegraph::actions::{apply, Action};
use sitegraph::config::SchemaConfig;
use sitegraph::node::Node;
use sitegraph::schema::{refresh_schema, SchemaCache};
use sitegraph::store::{NodeStore, SledStateStore};
use sitegraph::SiteState;
use std::collections::{BTreeMap, BTreeSet};
use tempfile::TempDir;

fn dirty(types: &[&str]) -> BTreeSet<String> {
    types.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_digest_change_does_not_rebuild_schema() {
    let mut store = NodeStore::new();
    let mut cache = SchemaCache::new();
    let settings = SchemaConfig::default();
    store.create_node(post("a", "d1", "X")).unwrap();
    let first = refresh_schema(&mut cache, &store, &dirty(&["Post"]), &BTreeMap::new(), &settings);
    assert!(first.rebuilt);

    store.update_node(post("a", "d2", "Y"), None).unwrap();
    let second = refresh_schema(&mut cache, &store, &dirty(&["Post"]), &BTreeMap::new(), &settings);
    assert!(!second.rebuilt);
    assert!(second.schema.has_field("Post", "title"));
}

#[test]
fn test_volatile_directory_fields_are_ignored() {
    let mut store = NodeStore::new();
    let mut cache = SchemaCache::new();
    let settings = SchemaConfig::default();
    store
        .create_node(Node::new("dir", "Directory", "d1").with_field("name", json!("posts")))
        .unwrap();
    refresh_schema(&mut cache, &store, &dirty(&["Directory"]), &BTreeMap::new(), &settings);

    store
        .update_node(
            Node::new("dir", "Directory", "d2")
                .with_field("name", json!("posts"))
                .with_field("atimeMs", json!(1700000000000u64)),
            None,
        )
        .unwrap();
    let refresh = refresh_schema(&mut cache, &store, &dirty(&["Directory"]), &BTreeMap::new(), &settings);
    assert!(!refresh.rebuilt);
}

#[test]
fn test_schema_cache_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let settings = SchemaConfig::default();
    {
        let db = SledStateStore::new(temp_dir.path()).unwrap();
        let state = SiteState::new();
        apply(&state, Action::CreateNode(post("a", "d1", "X"))).unwrap();
        refresh_schema(
            &mut state.schema_cache.lock(),
            &state.nodes(),
            &dirty(&["Post"]),
            &BTreeMap::new(),
            &settings,
        );
        state.persist(&db).unwrap();
    }

    let db = SledStateStore::new(temp_dir.path()).unwrap();
    let state = SiteState::load(&db).unwrap();
    let refresh = refresh_schema(
        &mut state.schema_cache.lock(),
        &state.nodes(),
        &BTreeSet::new(),
        &BTreeMap::new(),
        &settings,
    );
    assert!(!refresh.rebuilt);
    assert!(refresh.schema.has_type("Post"));
}

#[tokio::test]
async fn test_shape_change_reruns_every_query() {
    let temp_dir = TempDir::new().unwrap();
    let driver = plain_driver(&temp_dir);
    driver
        .apply_actions(vec![
            Action::CreateNode(post("a", "d1", "X")),
            Action::CreateNode(post("b", "d1", "Y")),
            Action::SetComponentQuery {
                component: "post.js".into(),
                query: POST_BY_ID.into(),
            },
            Action::CreatePage(post_page("/a/", "a")),
            Action::CreatePage(post_page("/b/", "b")),
        ])
        .await
        .unwrap();
    driver.run_pass().await.unwrap();

    // a new field on `a` changes the Post shape; `/b/` never read `a`
    driver
        .apply_actions(vec![Action::CreateNode(
            post("a", "d2", "X").with_field("draft", json!(true)),
        )])
        .await
        .unwrap();
    let report = driver.run_pass().await.unwrap();
    assert!(report.schema_rebuilt);
    assert_eq!(report.queries_run, 2);
    assert!(report.results_changed.is_empty());
    assert_eq!(report.pages_to_render.len(), 2);
    driver.shutdown().await;
}
