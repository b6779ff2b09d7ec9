//! Integration tests for dependency tracking and dirty-query computation

use super::test_utils::{apply_all, post, post_page};
use sitegraph::actions::Action;
use sitegraph::depgraph::DependencyGraph;
use sitegraph::pages::StaticQueryDescriptor;
use sitegraph::SiteState;
use std::collections::BTreeSet;

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_dirty_set_is_idempotent() {
    let mut graph = DependencyGraph::new();
    graph.record_node_dependency("/a/", "a");
    let known = set(&["/a/", "/b/"]);

    let first = graph.compute_dirty_query_ids(&set(&["a"]), &set(&["Post"]), &known);
    assert_eq!(first, set(&["/a/", "/b/"]));

    let second = graph.compute_dirty_query_ids(&BTreeSet::new(), &BTreeSet::new(), &known);
    assert!(second.is_empty());
}

#[test]
fn test_precise_invalidation() {
    let mut graph = DependencyGraph::new();
    graph.record_node_dependency("/q1/", "n1");
    graph.record_node_dependency("/q2/", "n2");
    let known = set(&["/q1/", "/q2/"]);

    let dirty = graph.compute_dirty_query_ids(&set(&["n1"]), &set(&["T"]), &known);
    assert_eq!(dirty, set(&["/q1/"]));

    let dirty = graph.compute_dirty_query_ids(&set(&["n3"]), &set(&["U"]), &known);
    assert!(dirty.is_empty());
}

#[test]
fn test_type_dependency_invalidates_on_any_node_of_type() {
    let mut graph = DependencyGraph::new();
    graph.record_type_dependency("/list/", "Post");
    let known = set(&["/list/"]);
    let dirty = graph.compute_dirty_query_ids(&set(&["new-post"]), &set(&["Post"]), &known);
    assert_eq!(dirty, set(&["/list/"]));
}

#[test]
fn test_untracked_query_runs_once_per_creation() {
    let state = SiteState::new();
    let descriptor = StaticQueryDescriptor::new("nav.js", r#"{"all": "Post"}"#);
    let id = descriptor.id.clone();
    apply_all(&state, vec![Action::ReplaceStaticQuery(descriptor)]);

    let known = state.pages.read().known_query_ids();
    let mut graph = state.graph.lock();
    let none = BTreeSet::new();
    assert!(graph.compute_dirty_query_ids(&none, &none, &known).contains(&id));
    assert!(graph.compute_dirty_query_ids(&none, &none, &known).is_empty());
}

#[test]
fn test_recreated_page_is_retried() {
    let state = SiteState::new();
    apply_all(&state, vec![Action::CreatePage(post_page("/a/", "a"))]);
    let none = BTreeSet::new();

    let known = state.pages.read().known_query_ids();
    assert_eq!(
        state.graph.lock().compute_dirty_query_ids(&none, &none, &known),
        set(&["/a/"])
    );

    apply_all(&state, vec![Action::DeletePage(post_page("/a/", "a"))]);
    apply_all(&state, vec![Action::CreatePage(post_page("/a/", "a"))]);
    let known = state.pages.read().known_query_ids();
    assert_eq!(
        state.graph.lock().compute_dirty_query_ids(&none, &none, &known),
        set(&["/a/"])
    );
}

#[test]
fn test_edges_of_deleted_pages_are_ignored() {
    let state = SiteState::new();
    apply_all(
        &state,
        vec![
            Action::CreateNode(post("a", "d1", "X")),
            Action::CreatePage(post_page("/a/", "a")),
        ],
    );
    state.graph.lock().record_node_dependency("/a/", "a");
    apply_all(&state, vec![Action::DeletePage(post_page("/a/", "a"))]);

    let known = state.pages.read().known_query_ids();
    let dirty = state
        .graph
        .lock()
        .compute_dirty_query_ids(&set(&["a"]), &set(&["Post"]), &known);
    assert!(dirty.is_empty());
}

#[test]
fn test_page_node_dependency_invalidates_page() {
    let mut graph = DependencyGraph::new();
    graph.record_page_node_dependency("/a/", "a");
    let dirty = graph.compute_dirty_query_ids(&set(&["a"]), &BTreeSet::new(), &set(&["/a/"]));
    assert_eq!(dirty, set(&["/a/"]));
}
