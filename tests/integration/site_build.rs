//! Full passes over a content directory with the default plugins

use super::test_utils::{read_json, site_config};
use sitegraph::config::SiteConfig;
use sitegraph::writer::page_data_path;
use sitegraph::BuildDriver;
use std::path::Path;
use tempfile::TempDir;

const MANIFEST: &str = r#"{
    "components": {
        "home.js": {"all": "Post", "sort": "title", "fields": ["title"]},
        "post.js": {"node": {"type": "MarkdownRemark", "id": "$id"}, "fields": ["frontmatter.title", "wordCount"]}
    },
    "pages": [{"path": "/", "component": "home.js"}],
    "collections": [{"type": "MarkdownRemark", "component": "post.js", "path": "/posts/{slug}/"}]
}"#;

fn write(root: &Path, name: &str, content: &str) {
    let path = root.join(name);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn config(temp_dir: &TempDir) -> SiteConfig {
    let mut config = site_config(temp_dir.path());
    config.workers.in_process = true;
    config
        .schema
        .resolvers
        .insert("MarkdownRemark".to_string(), vec!["text-stats".to_string()]);
    config
}

fn seed_content(temp_dir: &TempDir) {
    let content = temp_dir.path().join("content");
    write(&content, "pages.json", MANIFEST);
    write(
        &content,
        "posts.json",
        r#"[{"id": "p1", "type": "Post", "title": "First"}, {"id": "p2", "type": "Post", "title": "Second"}]"#,
    );
    write(&content, "hello.md", "---\ntitle: Hello\n---\none two three\n");
}

#[tokio::test]
async fn test_content_edit_rebuilds_only_affected_pages() {
    let temp_dir = TempDir::new().unwrap();
    seed_content(&temp_dir);
    let driver = BuildDriver::open(config(&temp_dir)).await.unwrap();
    let public = driver.config().public_path();

    let first = driver.run_pass().await.unwrap();
    assert!(first.schema_rebuilt);
    assert_eq!(first.pages, 2);
    // p1, p2, the markdown file and its child
    assert_eq!(first.nodes, 4);

    let home = read_json(&page_data_path(&public, "/"));
    assert_eq!(home["data"]["nodes"][0]["title"], "First");
    assert_eq!(home["data"]["nodes"][1]["title"], "Second");
    let post = read_json(&page_data_path(&public, "/posts/hello/"));
    assert_eq!(post["data"]["node"]["frontmatter"]["title"], "Hello");
    assert_eq!(post["data"]["node"]["wordCount"], 3);

    let quiet = driver.run_pass().await.unwrap();
    assert_eq!(quiet.queries_run, 0);
    assert!(quiet.pages_to_render.is_empty());

    write(
        &temp_dir.path().join("content"),
        "hello.md",
        "---\ntitle: Hello\n---\none two three four five\n",
    );
    let edited = driver.run_pass().await.unwrap();
    assert!(!edited.schema_rebuilt);
    assert!(edited.pages_written.contains("/posts/hello/"));
    assert!(!edited.pages_written.contains("/"));
    let post = read_json(&page_data_path(&public, "/posts/hello/"));
    assert_eq!(post["data"]["node"]["wordCount"], 5);

    driver.shutdown().await;
}

#[tokio::test]
async fn test_removed_file_deletes_nodes_and_pages() {
    let temp_dir = TempDir::new().unwrap();
    seed_content(&temp_dir);
    let driver = BuildDriver::open(config(&temp_dir)).await.unwrap();
    driver.run_pass().await.unwrap();

    std::fs::remove_file(temp_dir.path().join("content/hello.md")).unwrap();
    let report = driver.run_pass().await.unwrap();
    assert_eq!(report.nodes, 2);
    assert_eq!(report.pages, 1);
    assert!(driver.state().pages.read().get_page("/posts/hello/").is_none());

    driver.shutdown().await;
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    seed_content(&temp_dir);
    {
        let driver = BuildDriver::open(config(&temp_dir)).await.unwrap();
        driver.run_pass().await.unwrap();
        driver.shutdown().await;
    }

    let driver = BuildDriver::open(config(&temp_dir)).await.unwrap();
    assert_eq!(driver.state().nodes().len(), 4);
    assert!(driver.state().pages.read().get_page("/").is_some());
    driver.shutdown().await;
}

#[tokio::test]
async fn test_not_found_page_gets_html_copy() {
    let temp_dir = TempDir::new().unwrap();
    let content = temp_dir.path().join("content");
    write(&content, "posts.json", r#"[{"id": "p1", "type": "Post", "title": "First"}]"#);
    write(
        &content,
        "pages.json",
        r#"{
            "components": {"404.js": {"all": "Post", "fields": ["title"]}},
            "pages": [{"path": "/", "component": "404.js"}, {"path": "/404/", "component": "404.js"}]
        }"#,
    );
    let driver = BuildDriver::open(config(&temp_dir)).await.unwrap();
    let public = driver.config().public_path();

    let first = driver.run_pass().await.unwrap();
    assert_eq!(first.pages, 3);
    assert!(first.pages_written.contains("/404.html"));
    let copy = read_json(&page_data_path(&public, "/404.html"));
    assert_eq!(copy["path"], "/404.html");
    assert_eq!(copy["data"]["nodes"][0]["title"], "First");

    // the copy is recreated with its source and never goes stale on its own
    let quiet = driver.run_pass().await.unwrap();
    assert_eq!(quiet.pages, 3);
    assert_eq!(quiet.queries_run, 0);

    write(
        &content,
        "pages.json",
        r#"{
            "components": {"404.js": {"all": "Post", "fields": ["title"]}},
            "pages": [{"path": "/", "component": "404.js"}]
        }"#,
    );
    let removed = driver.run_pass().await.unwrap();
    assert_eq!(removed.pages, 1);
    assert!(driver.state().pages.read().get_page("/404.html").is_none());

    driver.shutdown().await;
}
