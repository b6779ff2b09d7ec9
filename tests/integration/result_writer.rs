//! Integration tests for the page-data writer queue

use super::test_utils::read_json;
use serde_json::json;
use sitegraph::error::BuildError;
use sitegraph::pages::PageDescriptor;
use sitegraph::writer::{page_data_path, PageDataJob, ResultWriter};
use sitegraph::SiteState;
use tempfile::TempDir;

fn state_with_pages(paths: &[&str]) -> SiteState {
    let state = SiteState::new();
    {
        let mut pages = state.pages.write();
        for path in paths {
            pages.create_page(PageDescriptor::new(*path, "page.js"));
        }
    }
    state
}

fn job(path: &str, title: &str) -> PageDataJob {
    PageDataJob {
        path: path.to_string(),
        result: json!({"data": {"title": title}, "pageContext": {"path": path}}),
        result_hash: format!("hash-{}", title),
    }
}

#[tokio::test]
async fn test_pending_job_for_same_path_is_superseded() {
    let temp_dir = TempDir::new().unwrap();
    let state = state_with_pages(&["/a/"]);
    let writer = ResultWriter::start(state, temp_dir.path().to_path_buf(), 2);

    // the current-thread runtime does not run workers until the first await
    writer.enqueue(job("/a/", "first"));
    writer.enqueue(job("/a/", "second"));
    writer.enqueue(job("/a/", "third"));
    writer.wait_till_drained().await.unwrap();

    let stats = writer.stats();
    assert_eq!(stats.superseded, 2);
    assert_eq!(stats.completed, 1);
    let written = read_json(&page_data_path(temp_dir.path(), "/a/"));
    assert_eq!(written["data"]["title"], "third");
    assert_eq!(written["pageContext"]["path"], "/a/");

    writer.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_pages_drain_before_returning() {
    let temp_dir = TempDir::new().unwrap();
    let paths: Vec<String> = (0..40).map(|i| format!("/post-{}/", i)).collect();
    let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let state = state_with_pages(&refs);
    let writer = ResultWriter::start(state.clone(), temp_dir.path().to_path_buf(), 4);

    for path in &paths {
        writer.enqueue(job(path, path));
    }
    writer.wait_till_drained().await.unwrap();

    for path in &paths {
        let written = read_json(&page_data_path(temp_dir.path(), path));
        assert_eq!(written["data"]["title"], path.as_str());
    }
    assert_eq!(state.flags.lock().page_data_written.len(), paths.len());

    writer.stop().await;
}

#[tokio::test]
async fn test_failure_is_sticky_until_cleared() {
    let temp_dir = TempDir::new().unwrap();
    let state = state_with_pages(&["/a/"]);
    let writer = ResultWriter::start(state, temp_dir.path().to_path_buf(), 1);

    writer.enqueue(job("/deleted/", "x"));
    let err = writer.wait_till_drained().await.unwrap_err();
    assert!(matches!(err, BuildError::PageNotFound(ref p) if p == "/deleted/"));
    assert!(writer.wait_till_drained().await.is_err());

    assert!(writer.clear_error().is_some());
    writer.enqueue(job("/a/", "ok"));
    writer.wait_till_drained().await.unwrap();
    let written = read_json(&page_data_path(temp_dir.path(), "/a/"));
    assert_eq!(written["data"]["title"], "ok");

    writer.stop().await;
}
