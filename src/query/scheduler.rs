//! Query scheduler
//!
//! Turns dirty query ids into [`QueryJob`]s and runs them on a bounded keyed queue.
//! Re-enqueueing an id that is still pending replaces the older job.

use super::runner::page_job_context;
use super::{QueryJob, QueryRunner};
use crate::error::BuildError;
use crate::pages::{is_static_query_id, PageRegistry};
use crate::queue::{KeyedQueue, QueueStats};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

pub struct QueryScheduler {
    queue: KeyedQueue<QueryJob>,
}

impl QueryScheduler {
    pub fn start(runner: Arc<QueryRunner>, concurrency: usize) -> Self {
        QueryScheduler {
            queue: KeyedQueue::start("query", runner, concurrency),
        }
    }

    /// Build jobs for the given ids; ids that are neither a page nor a static query are skipped
    pub fn build_jobs(pages: &PageRegistry, ids: &BTreeSet<String>) -> Vec<QueryJob> {
        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if is_static_query_id(id) {
                let Some(descriptor) = pages.get_static_query(id) else {
                    debug!(query_id = %id, "Skipping unknown static query");
                    continue;
                };
                jobs.push(QueryJob {
                    id: id.clone(),
                    query: descriptor.query.clone(),
                    context: json!({"path": id}),
                    is_page: false,
                    component_path: descriptor.component.clone(),
                    plugin: String::new(),
                });
            } else {
                let Some(page) = pages.get_page(id) else {
                    debug!(query_id = %id, "Skipping unknown page");
                    continue;
                };
                jobs.push(QueryJob {
                    id: id.clone(),
                    query: pages.component_query(&page.component).to_string(),
                    context: page_job_context(page),
                    is_page: true,
                    component_path: page.component.clone(),
                    plugin: page.owner.clone(),
                });
            }
        }
        jobs
    }

    pub fn enqueue(&self, job: QueryJob) {
        self.queue.enqueue(job);
    }

    /// Enqueue a batch and wait for the queue to drain
    pub async fn run_queries(&self, jobs: Vec<QueryJob>) -> Result<usize, BuildError> {
        let count = jobs.len();
        if count == 0 {
            return Ok(0);
        }
        info!(queries = count, "Running queries");
        self.queue.enqueue_all(jobs);
        self.queue.wait_till_drained().await?;
        Ok(count)
    }

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
