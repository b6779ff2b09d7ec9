//! Integration tests for the node store and its persistence

use super::test_utils::{apply_all, post};
use serde_json::json;
use sitegraph::actions::Action;
use sitegraph::error::StoreError;
use sitegraph::node::Node;
use sitegraph::store::{MutationKind, NodeReader, NodeStore, SledStateStore};
use sitegraph::SiteState;
use tempfile::TempDir;

#[test]
fn test_update_replaces_whole_record() {
    let mut store = NodeStore::new();
    let old = post("a", "d1", "X").with_field("draft", json!(true));
    store.create_node(old.clone()).unwrap();

    let touched = store
        .update_node(post("a", "d2", "Y"), Some(&old))
        .unwrap();
    assert_eq!(touched.kind, MutationKind::Updated);

    let stored = store.get_node("a").unwrap();
    assert_eq!(stored.fields.get("title"), Some(&json!("Y")));
    assert!(!stored.fields.contains_key("draft"));
}

#[test]
fn test_type_change_is_rejected_and_store_unchanged() {
    let mut store = NodeStore::new();
    store.create_node(post("a", "d1", "X")).unwrap();

    let err = store
        .create_node(Node::new("a", "Author", "d2"))
        .unwrap_err();
    assert!(matches!(err, StoreError::TypeChanged { .. }));
    assert_eq!(store.get_node("a").unwrap().node_type(), "Post");
    assert!(store.get_nodes_by_type("Author").is_empty());
}

#[test]
fn test_has_node_changed() {
    let mut store = NodeStore::new();
    store.create_node(post("a", "d1", "X")).unwrap();
    assert!(!store.has_node_changed("a", "d1"));
    assert!(store.has_node_changed("a", "d2"));
    assert!(store.has_node_changed("missing", "d1"));
}

#[test]
fn test_empty_collection_survives_until_pruned() {
    let mut store = NodeStore::new();
    let node = post("a", "d1", "X");
    store.create_node(node.clone()).unwrap();
    store.delete_node(&node).unwrap();

    assert!(store.has_collection("Post"));
    assert!(store.get_nodes_by_type("Post").is_empty());
    assert_eq!(store.prune_empty_collections(), vec!["Post".to_string()]);
    assert!(!store.has_collection("Post"));
}

#[test]
fn test_nodes_persist_across_reopen() {
    let temp_dir = TempDir::new().unwrap();
    {
        let db = SledStateStore::new(temp_dir.path()).unwrap();
        let state = SiteState::new();
        apply_all(
            &state,
            vec![
                Action::CreateNode(post("a", "d1", "X")),
                Action::CreateNode(post("b", "d1", "Y")),
            ],
        );
        state.persist(&db).unwrap();

        apply_all(&state, vec![Action::DeleteNode(post("b", "d1", "Y"))]);
        state.persist(&db).unwrap();
    }

    let db = SledStateStore::new(temp_dir.path()).unwrap();
    let state = SiteState::load(&db).unwrap();
    let nodes = state.nodes();
    assert_eq!(nodes.get_node("a").unwrap().fields["title"], json!("X"));
    assert!(nodes.get_node("b").is_none());
}
