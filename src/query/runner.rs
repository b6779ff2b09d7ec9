//! Per-job query processing
//!
//! Execute, record dependencies, serialize once, compare the result hash with the
//! stored one, and only on a change hand the result on: page results to the
//! [`ResultWriter`], static results straight to disk. The new hash is stored after the
//! artifact is written.

use super::{DependencyRecorder, QueryExecutor, QueryJob, QueryRequest};
use crate::config::BuildMode;
use crate::error::BuildError;
use crate::hashing::compute_result_hash;
use crate::queue::JobHandler;
use crate::schema::Schema;
use crate::state::SiteState;
use crate::writer::{static_query_result_path, write_atomic, PageDataJob, ResultWriter};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// What processing one job amounted to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    /// Same hash as last time; nothing written
    Unchanged,
    Changed { result_hash: String },
    /// Query errors, reported in watch mode
    Failed,
    /// The page was deleted before its job ran
    Skipped,
}

pub struct QueryRunner {
    state: SiteState,
    schema: Arc<RwLock<Arc<Schema>>>,
    executor: Arc<dyn QueryExecutor>,
    writer: Arc<ResultWriter>,
    public_dir: PathBuf,
    mode: BuildMode,
}

impl QueryRunner {
    pub fn new(
        state: SiteState,
        schema: Arc<RwLock<Arc<Schema>>>,
        executor: Arc<dyn QueryExecutor>,
        writer: Arc<ResultWriter>,
        public_dir: PathBuf,
        mode: BuildMode,
    ) -> Self {
        QueryRunner {
            state,
            schema,
            executor,
            writer,
            public_dir,
            mode,
        }
    }

    pub async fn run(&self, job: QueryJob) -> Result<QueryOutcome, BuildError> {
        let started = Instant::now();
        let page_context = if job.is_page {
            let context = self
                .state
                .pages
                .read()
                .get_page(&job.id)
                .map(|page| page.context.clone());
            match context {
                Some(context) => Some(context),
                None => {
                    debug!(query_id = %job.id, "Page deleted before its query ran");
                    return Ok(QueryOutcome::Skipped);
                }
            }
        } else {
            None
        };

        let schema = Arc::clone(&*self.schema.read());
        let recorder = DependencyRecorder::new();
        let result = self
            .executor
            .execute(QueryRequest {
                job: &job,
                schema: &schema,
                nodes: &self.state.nodes,
                recorder: &recorder,
            })
            .await?;
        self.state.graph.lock().record_all(&recorder.take());

        if !result.is_ok() {
            let err = BuildError::QueryFailed {
                query_id: job.id.clone(),
                component: job.component_path.clone(),
                context: serde_json::to_string_pretty(&job.context)?,
                query: job.query.clone(),
                errors: result.errors,
                plugin: if job.plugin.is_empty() {
                    "none".to_string()
                } else {
                    job.plugin.clone()
                },
            };
            return match self.mode {
                BuildMode::Build => Err(err),
                BuildMode::Watch => {
                    error!(query_id = %job.id, error = %err, "Query failed");
                    Ok(QueryOutcome::Failed)
                }
            };
        }

        let body = match page_context {
            Some(page_context) => json!({"data": result.data, "pageContext": page_context}),
            None => json!({"data": result.data}),
        };
        let serialized = serde_json::to_string(&body)?;
        let result_hash = compute_result_hash(&serialized);

        if self.state.graph.lock().result_hash(&job.id) == Some(result_hash.as_str()) {
            debug!(
                query_id = %job.id,
                duration_ms = started.elapsed().as_millis() as u64,
                "Query result unchanged"
            );
            return Ok(QueryOutcome::Unchanged);
        }
        self.state.flags.lock().query_result(&job.id);

        // the stored hash only moves once the artifact exists
        if job.is_page {
            self.writer.enqueue(PageDataJob {
                path: job.id.clone(),
                result: body,
                result_hash: result_hash.clone(),
            });
        } else {
            let target = static_query_result_path(&self.public_dir, &result_hash);
            write_atomic(&target, serialized.as_bytes()).await?;
            self.state.graph.lock().set_result_hash(&job.id, &result_hash);
            self.state.flags.lock().static_query();
        }

        info!(
            query_id = %job.id,
            result_hash = %&result_hash[..12],
            duration_ms = started.elapsed().as_millis() as u64,
            "Query result changed"
        );
        Ok(QueryOutcome::Changed { result_hash })
    }
}

#[async_trait]
impl JobHandler<QueryJob> for QueryRunner {
    async fn handle(&self, job: QueryJob) -> Result<(), BuildError> {
        self.run(job).await.map(|_| ())
    }
}

/// Body for a page job: page fields overlaid with the page's own context
pub(crate) fn page_job_context(page: &crate::pages::PageDescriptor) -> Value {
    let mut context = match serde_json::to_value(page) {
        Ok(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    if let Value::Object(extra) = &page.context {
        for (key, value) in extra {
            context.insert(key.clone(), value.clone());
        }
    }
    Value::Object(context)
}
