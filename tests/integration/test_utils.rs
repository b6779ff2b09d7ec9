//! Shared fixtures for integration tests

use serde_json::json;
use sitegraph::actions::{apply, Action};
use sitegraph::config::SiteConfig;
use sitegraph::node::Node;
use sitegraph::pages::PageDescriptor;
use sitegraph::query::SelectorExecutor;
use sitegraph::{BuildDriver, SiteState};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Page query reading one `Post` by the page's `id` context value
pub const POST_BY_ID: &str = r#"{"node": {"type": "Post", "id": "$id"}, "fields": ["title"]}"#;

pub fn site_config(root: &Path) -> SiteConfig {
    SiteConfig {
        site_root: root.to_path_buf(),
        public_dir: root.join("public"),
        cache_dir: root.join(".cache"),
        content_dir: root.join("content"),
        ..SiteConfig::default()
    }
}

pub fn post(id: &str, digest: &str, title: &str) -> Node {
    Node::new(id, "Post", digest).with_field("title", json!(title))
}

pub fn post_page(path: &str, id: &str) -> PageDescriptor {
    PageDescriptor::new(path, "post.js").with_context(json!({"id": id}))
}

/// Driver with no plugins, the selector executor and no persistence
pub fn plain_driver(temp_dir: &TempDir) -> BuildDriver {
    BuildDriver::new(
        site_config(temp_dir.path()),
        SiteState::new(),
        Vec::new(),
        Arc::new(SelectorExecutor::new()),
    )
}

/// Apply actions directly to a state, panicking on failure
pub fn apply_all(state: &SiteState, actions: Vec<Action>) {
    for action in actions {
        apply(state, action).unwrap();
    }
}

pub fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}
