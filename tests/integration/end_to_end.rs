//! One node, one page, three passes: the result hash decides what gets rewritten

use super::test_utils::{plain_driver, post, post_page, read_json, POST_BY_ID};
use sitegraph::actions::Action;
use sitegraph::writer::page_data_path;
use tempfile::TempDir;

#[tokio::test]
async fn test_result_hash_gates_rewrites_and_renders() {
    let temp_dir = TempDir::new().unwrap();
    let driver = plain_driver(&temp_dir);
    let artifact = page_data_path(&driver.config().public_path(), "/a/");

    driver
        .apply_actions(vec![
            Action::SetComponentQuery {
                component: "post.js".to_string(),
                query: POST_BY_ID.to_string(),
            },
            Action::CreateNode(post("a", "d1", "X")),
            Action::CreatePage(post_page("/a/", "a")),
        ])
        .await
        .unwrap();

    let first = driver.run_pass().await.unwrap();
    assert_eq!(first.queries_run, 1);
    assert!(first.pages_written.contains("/a/"));
    assert!(first.pages_to_render.contains("/a/"));
    assert_eq!(read_json(&artifact)["data"]["node"]["title"], "X");
    let h1 = driver.state().graph.lock().result_hash("/a/").map(str::to_string).unwrap();

    // new digest, same title: the query reruns but its result is identical
    driver
        .apply_actions(vec![Action::UpdateNode {
            node: post("a", "d2", "X"),
            previous: Some(post("a", "d1", "X")),
        }])
        .await
        .unwrap();
    std::fs::remove_file(&artifact).unwrap();

    let second = driver.run_pass().await.unwrap();
    assert_eq!(second.queries_run, 1);
    assert!(second.results_changed.is_empty());
    assert!(second.pages_written.is_empty());
    assert!(second.pages_to_render.is_empty());
    assert!(!artifact.exists());
    assert_eq!(driver.state().graph.lock().result_hash("/a/"), Some(h1.as_str()));

    driver
        .apply_actions(vec![Action::UpdateNode {
            node: post("a", "d3", "Y"),
            previous: Some(post("a", "d2", "X")),
        }])
        .await
        .unwrap();

    let third = driver.run_pass().await.unwrap();
    assert_eq!(third.queries_run, 1);
    assert!(third.results_changed.contains("/a/"));
    assert!(third.pages_to_render.contains("/a/"));
    assert_eq!(read_json(&artifact)["data"]["node"]["title"], "Y");
    let h2 = driver.state().graph.lock().result_hash("/a/").map(str::to_string).unwrap();
    assert_ne!(h1, h2);

    driver.shutdown().await;
}
