//! Page result writer
//!
//! Deduplicating queue keyed by page path. Each job merges a query result with its page
//! descriptor and writes `page-data.json` under the public directory. The page's result
//! hash is recorded only once its file is on disk, so a failed write leaves the query
//! dirty for the next pass. Callers block on [`ResultWriter::wait_till_drained`] before
//! rendering.

use crate::error::BuildError;
use crate::queue::{JobHandler, Keyed, KeyedQueue, QueueStats};
use crate::state::SiteState;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Write a query result for one page
#[derive(Debug, Clone, PartialEq)]
pub struct PageDataJob {
    pub path: String,
    /// `{data, pageContext}`
    pub result: Value,
    /// Hash of the serialized result, stored once the file is written
    pub result_hash: String,
}

impl Keyed for PageDataJob {
    fn key(&self) -> String {
        self.path.clone()
    }
}

/// Location of a page's artifact; the root path maps to `index`
pub fn page_data_path(public_dir: &Path, page_path: &str) -> PathBuf {
    let trimmed = page_path.trim_matches('/');
    let fixed = if trimmed.is_empty() { "index" } else { trimmed };
    let mut path = public_dir.join("page-data");
    for segment in fixed.split('/').filter(|s| !s.is_empty()) {
        path.push(segment);
    }
    path.join("page-data.json")
}

/// Location of a static query result, named by its result hash
pub fn static_query_result_path(public_dir: &Path, result_hash: &str) -> PathBuf {
    public_dir
        .join("static")
        .join("d")
        .join(format!("{}.json", result_hash))
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write `bytes` to `path` via a temporary file and rename
///
/// Readers never observe a partially written artifact.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), BuildError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| BuildError::write_failed(parent, e))?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    tokio::fs::write(&temp_path, bytes)
        .await
        .map_err(|e| BuildError::write_failed(&temp_path, e))?;

    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(BuildError::write_failed(path, e));
    }
    Ok(())
}

struct PageDataWriter {
    state: SiteState,
    public_dir: PathBuf,
}

#[async_trait]
impl JobHandler<PageDataJob> for PageDataWriter {
    async fn handle(&self, job: PageDataJob) -> Result<(), BuildError> {
        let chunk_name = self
            .state
            .pages
            .read()
            .get_page(&job.path)
            .map(|page| page.component_chunk_name.clone())
            .ok_or_else(|| BuildError::PageNotFound(job.path.clone()))?;

        let mut body = Map::new();
        body.insert("componentChunkName".to_string(), Value::String(chunk_name));
        body.insert("path".to_string(), Value::String(job.path.clone()));
        if let Value::Object(result) = job.result {
            body.extend(result);
        }
        let bytes = serde_json::to_vec(&Value::Object(body))?;

        let target = page_data_path(&self.public_dir, &job.path);
        write_atomic(&target, &bytes).await?;
        self.state.graph.lock().set_result_hash(&job.path, &job.result_hash);
        self.state.flags.lock().page_data(&job.path);
        debug!(path = %job.path, file = %target.display(), "Wrote page data");
        Ok(())
    }
}

pub struct ResultWriter {
    queue: KeyedQueue<PageDataJob>,
}

impl ResultWriter {
    pub fn start(state: SiteState, public_dir: PathBuf, concurrency: usize) -> Self {
        let handler = Arc::new(PageDataWriter { state, public_dir });
        ResultWriter {
            queue: KeyedQueue::start("page-data", handler, concurrency),
        }
    }

    /// A pending job for the same path is replaced
    pub fn enqueue(&self, job: PageDataJob) {
        self.queue.enqueue(job);
    }

    /// Resolves once every enqueued page is written; the first write failure is returned
    pub async fn wait_till_drained(&self) -> Result<(), BuildError> {
        self.queue.wait_till_drained().await
    }

    pub fn clear_error(&self) -> Option<BuildError> {
        self.queue.clear_error()
    }

    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub async fn stop(&self) {
        self.queue.stop().await;
    }
}
