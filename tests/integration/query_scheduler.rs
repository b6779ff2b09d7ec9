//! Integration tests for query scheduling through the build driver

use super::test_utils::{apply_all, plain_driver, post, post_page, read_json, site_config, POST_BY_ID};
use sitegraph::actions::Action;
use sitegraph::config::BuildMode;
use sitegraph::error::BuildError;
use sitegraph::pages::{PageDescriptor, PageRegistry, StaticQueryDescriptor};
use sitegraph::query::{QueryScheduler, SelectorExecutor};
use sitegraph::writer::page_data_path;
use sitegraph::{BuildDriver, SiteState};
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::TempDir;

const BROKEN_QUERY: &str = "{ node(";

#[tokio::test]
async fn test_build_mode_aborts_on_query_error_and_recovers() {
    let temp_dir = TempDir::new().unwrap();
    let driver = plain_driver(&temp_dir);
    apply_all(
        driver.state(),
        vec![
            Action::SetComponentQuery {
                component: "post.js".to_string(),
                query: BROKEN_QUERY.to_string(),
            },
            Action::CreateNode(post("a", "d1", "Hello")),
            Action::CreatePage(post_page("/a/", "a")),
        ],
    );

    let err = driver.run_pass().await.unwrap_err();
    match err {
        BuildError::QueryFailed { query_id, component, .. } => {
            assert_eq!(query_id, "/a/");
            assert_eq!(component, "post.js");
        }
        other => panic!("expected query failure, got {:?}", other),
    }
    let public = driver.config().public_path();
    assert!(!page_data_path(&public, "/a/").exists());

    // fixing the component query makes its pages dirty again
    apply_all(
        driver.state(),
        vec![Action::SetComponentQuery {
            component: "post.js".to_string(),
            query: POST_BY_ID.to_string(),
        }],
    );
    let report = driver.run_pass().await.unwrap();
    assert_eq!(report.queries_run, 1);
    assert!(report.pages_written.contains("/a/"));
    let written = read_json(&page_data_path(&public, "/a/"));
    assert_eq!(written["data"]["node"]["title"], "Hello");

    driver.shutdown().await;
}

#[tokio::test]
async fn test_watch_mode_reports_and_keeps_going() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = site_config(temp_dir.path());
    config.mode = BuildMode::Watch;
    let driver = BuildDriver::new(config, SiteState::new(), Vec::new(), Arc::new(SelectorExecutor::new()));

    apply_all(
        driver.state(),
        vec![
            Action::SetComponentQuery {
                component: "broken.js".to_string(),
                query: BROKEN_QUERY.to_string(),
            },
            Action::SetComponentQuery {
                component: "post.js".to_string(),
                query: POST_BY_ID.to_string(),
            },
            Action::CreateNode(post("a", "d1", "Hello")),
            Action::CreatePage(PageDescriptor::new("/broken/", "broken.js")),
            Action::CreatePage(post_page("/a/", "a")),
        ],
    );

    let report = driver.run_pass().await.unwrap();
    assert_eq!(report.queries_run, 2);
    assert_eq!(report.pages_written, ["/a/".to_string()].into_iter().collect());
    assert!(!page_data_path(&driver.config().public_path(), "/broken/").exists());

    driver.shutdown().await;
}

#[test]
fn test_build_jobs_covers_pages_and_static_queries() {
    let mut pages = PageRegistry::new();
    pages.set_component_query("post.js", POST_BY_ID);
    pages.create_page(post_page("/a/", "a"));
    let (static_id, _) = pages.replace_static_query(StaticQueryDescriptor::new("nav.js", r#"{"all": "Post"}"#));

    let ids: BTreeSet<String> = ["/a/", static_id.as_str(), "/gone/", "sq--missing"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let jobs = QueryScheduler::build_jobs(&pages, &ids);
    assert_eq!(jobs.len(), 2);

    let page_job = jobs.iter().find(|j| j.is_page).unwrap();
    assert_eq!(page_job.id, "/a/");
    assert_eq!(page_job.query, POST_BY_ID);
    assert_eq!(page_job.context["id"], "a");
    assert_eq!(page_job.context["path"], "/a/");

    let static_job = jobs.iter().find(|j| !j.is_page).unwrap();
    assert_eq!(static_job.id, static_id);
    assert_eq!(static_job.component_path, "nav.js");
}

#[tokio::test]
async fn test_static_query_result_is_written_once_per_change() {
    let temp_dir = TempDir::new().unwrap();
    let driver = plain_driver(&temp_dir);
    apply_all(
        driver.state(),
        vec![
            Action::CreateNode(post("a", "d1", "Hello")),
            Action::ReplaceStaticQuery(StaticQueryDescriptor::new(
                "nav.js",
                r#"{"all": "Post", "fields": ["title"]}"#,
            )),
        ],
    );

    let first = driver.run_pass().await.unwrap();
    assert_eq!(first.queries_run, 1);
    assert_eq!(first.results_changed.len(), 1);
    assert!(first.bundling_dirty);

    let second = driver.run_pass().await.unwrap();
    assert_eq!(second.queries_run, 0);

    apply_all(
        driver.state(),
        vec![Action::CreateNode(post("b", "d1", "World"))],
    );
    let third = driver.run_pass().await.unwrap();
    assert_eq!(third.queries_run, 1);
    assert_eq!(third.results_changed.len(), 1);

    let static_dir = driver.config().public_path().join("static").join("d");
    let files = std::fs::read_dir(static_dir).unwrap().count();
    assert_eq!(files, 2);

    driver.shutdown().await;
}

#[tokio::test]
async fn test_failed_write_is_retried_on_next_pass() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = site_config(temp_dir.path());
    config.mode = BuildMode::Watch;
    let driver = BuildDriver::new(config, SiteState::new(), Vec::new(), Arc::new(SelectorExecutor::new()));
    apply_all(
        driver.state(),
        vec![
            Action::SetComponentQuery {
                component: "post.js".to_string(),
                query: POST_BY_ID.to_string(),
            },
            Action::CreateNode(post("a", "d1", "Hello")),
            Action::CreatePage(post_page("/a/", "a")),
        ],
    );

    // a plain file where the page-data directory should go
    let public = driver.config().public_path();
    std::fs::create_dir_all(&public).unwrap();
    let blocker = public.join("page-data");
    std::fs::write(&blocker, b"").unwrap();

    let err = driver.run_pass().await.unwrap_err();
    assert!(matches!(err, BuildError::WriteFailed { .. }));
    assert!(driver.state().graph.lock().result_hash("/a/").is_none());

    std::fs::remove_file(&blocker).unwrap();
    let report = driver.run_pass().await.unwrap();
    assert_eq!(report.queries_run, 1);
    assert!(report.pages_written.contains("/a/"));
    assert!(report.pages_to_render.contains("/a/"));
    let written = read_json(&page_data_path(&public, "/a/"));
    assert_eq!(written["data"]["node"]["title"], "Hello");

    let quiet = driver.run_pass().await.unwrap();
    assert_eq!(quiet.queries_run, 0);

    driver.shutdown().await;
}
