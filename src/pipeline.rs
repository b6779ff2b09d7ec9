//! Build driver
//!
//! One incremental pass, end to end:
//!
//! 1. source nodes and let transformers react to created or updated nodes
//! 2. create pages, delete pages nobody recreated
//! 3. drain the pass flags and refresh the schema for dirty types
//! 4. compute dirty query ids, run them, wait for the writer to drain
//! 5. persist state and report what must be re-rendered
//!
//! Plugin actions are applied in declared plugin order. Store locks are never held
//! across an await; plugins see cloned snapshots.

use crate::actions::{apply, Action, Applied};
use crate::config::{BuildMode, SiteConfig};
use crate::error::BuildError;
use crate::flags::Flags;
use crate::plugin::{default_plugins, Plugin, SourceContext};
use crate::query::{QueryExecutor, QueryRunner, QueryScheduler, SelectorExecutor};
use crate::schema::{refresh_schema, Schema, WorkerField};
use crate::state::SiteState;
use crate::store::{MutationKind, NodeReader, SledStateStore};
use crate::worker::{DerivedCache, FieldDispatcher, LocalResolvers, ParentApi, ResolverRegistry, WorkerPool};
use crate::writer::ResultWriter;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Summary of one pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    /// RFC 3339 start time of the pass
    pub started_at: String,
    pub nodes: usize,
    pub pages: usize,
    pub actions_applied: usize,
    pub queries_run: usize,
    /// Query ids whose result hash changed
    pub results_changed: BTreeSet<String>,
    /// Pages whose page-data file was written
    pub pages_written: BTreeSet<String>,
    /// Pages the renderer has to rebuild
    pub pages_to_render: BTreeSet<String>,
    pub schema_rebuilt: bool,
    pub bundling_dirty: bool,
    pub duration_ms: u64,
}

pub struct BuildDriver {
    config: SiteConfig,
    state: SiteState,
    plugins: Vec<Arc<dyn Plugin>>,
    schema: Arc<RwLock<Arc<Schema>>>,
    scheduler: QueryScheduler,
    writer: Arc<ResultWriter>,
    db: Option<SledStateStore>,
    pool: Option<Arc<WorkerPool>>,
}

impl BuildDriver {
    /// Driver over an existing state, without persistence
    pub fn new(
        config: SiteConfig,
        state: SiteState,
        plugins: Vec<Arc<dyn Plugin>>,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        let public_dir = config.public_path();
        let schema = Arc::new(RwLock::new(Arc::new(Schema::default())));
        let writer = Arc::new(ResultWriter::start(
            state.clone(),
            public_dir.clone(),
            config.writer.concurrency,
        ));
        let runner = Arc::new(QueryRunner::new(
            state.clone(),
            Arc::clone(&schema),
            executor,
            Arc::clone(&writer),
            public_dir,
            config.mode,
        ));
        let scheduler = QueryScheduler::start(runner, config.scheduler.concurrency);

        BuildDriver {
            config,
            state,
            plugins,
            schema,
            scheduler,
            writer,
            db: None,
            pool: None,
        }
    }

    /// Driver for a site: persisted state, default plugins, selector queries and
    /// field resolvers either in-process or in the worker pool
    pub async fn open(config: SiteConfig) -> Result<Self, BuildError> {
        let db = SledStateStore::new(config.state_path())?;
        let state = SiteState::load(&db)?;
        let api = ParentApi::new(state.clone());

        let (dispatcher, pool): (Arc<dyn FieldDispatcher>, Option<Arc<WorkerPool>>) =
            if config.workers.in_process {
                let local = LocalResolvers::new(
                    ResolverRegistry::builtin(),
                    api,
                    DerivedCache::new(config.cache_path().join("derived")),
                    config.effective_path_prefix(),
                );
                (Arc::new(local), None)
            } else {
                let pool = Arc::new(WorkerPool::spawn(&config.workers, &config.site_root, api).await?);
                (Arc::clone(&pool) as Arc<dyn FieldDispatcher>, Some(pool))
            };

        let executor = Arc::new(SelectorExecutor::with_dispatcher(dispatcher));
        let plugins = default_plugins(&config);
        let mut driver = Self::new(config, state, plugins, executor);
        driver.db = Some(db);
        driver.pool = pool;
        Ok(driver)
    }

    pub fn with_persistence(mut self, db: SledStateStore) -> Self {
        self.db = Some(db);
        self
    }

    pub fn state(&self) -> &SiteState {
        &self.state
    }

    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    pub fn schema(&self) -> Arc<Schema> {
        Arc::clone(&*self.schema.read())
    }

    /// Forget all state, in memory and on disk
    pub fn reset(&self) -> Result<(), BuildError> {
        self.state.reset();
        *self.schema.write() = Arc::new(Schema::default());
        if let Some(db) = &self.db {
            db.clear()?;
        }
        info!("Cleared build state");
        Ok(())
    }

    /// Run one incremental pass
    pub async fn run_pass(&self) -> Result<BuildReport, BuildError> {
        let started = Instant::now();
        let started_at = chrono::Utc::now().to_rfc3339();

        let mut actions_applied = self.source_nodes().await?;
        actions_applied += self.create_pages().await?;
        let pruned = self.state.nodes.write().prune_empty_collections();
        if !pruned.is_empty() {
            debug!(types = %pruned.join(", "), "Pruned empty type collections");
        }

        let flags = self.state.flags.lock().drain();
        // a failed pass leaves its rebuild for the next one
        let schema_rebuilt = self.refresh_schema(&flags) || flags.schema_dirty;
        let dirty = self.dirty_query_ids(&flags, schema_rebuilt);

        let queries_run = match self.run_queries(&dirty).await {
            Ok(count) => count,
            Err(err) => {
                self.scheduler.clear_error();
                self.writer.clear_error();
                self.requeue_after_failure(&dirty, schema_rebuilt);
                return Err(err);
            }
        };

        let mut output = self.state.flags.lock().drain();
        // artifacts written by an earlier failed pass still need rendering
        output.changed_query_results.extend(flags.changed_query_results.iter().cloned());
        output.page_data_written.extend(flags.page_data_written.iter().cloned());
        if let Some(db) = &self.db {
            self.state.persist(db)?;
        }

        let bundling_dirty = flags.bundling_dirty() || output.bundling_dirty();
        let (nodes, pages, pages_to_render) = {
            let pages = self.state.pages.read();
            let to_render = if schema_rebuilt || bundling_dirty {
                pages.pages().map(|p| p.path.clone()).collect()
            } else {
                output.page_data_written.clone()
            };
            (self.state.nodes.read().len(), pages.pages().count(), to_render)
        };

        let report = BuildReport {
            started_at,
            nodes,
            pages,
            actions_applied,
            queries_run,
            results_changed: output.changed_query_results,
            pages_written: output.page_data_written,
            pages_to_render,
            schema_rebuilt,
            bundling_dirty,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            nodes = report.nodes,
            pages = report.pages,
            queries = report.queries_run,
            changed = report.results_changed.len(),
            written = report.pages_written.len(),
            duration_ms = report.duration_ms,
            "Build pass complete"
        );
        Ok(report)
    }

    async fn source_nodes(&self) -> Result<usize, BuildError> {
        let snapshot = self.state.nodes.read().clone();
        let ctx = SourceContext {
            config: &self.config,
            nodes: &snapshot,
        };
        let mut applied = 0;
        for plugin in &self.plugins {
            let actions = plugin.source_nodes(&ctx).await?;
            if !actions.is_empty() {
                debug!(plugin = plugin.name(), actions = actions.len(), "Sourced nodes");
            }
            applied += self.apply_actions(actions).await?;
        }
        Ok(applied)
    }

    async fn create_pages(&self) -> Result<usize, BuildError> {
        self.state.pages.write().begin_pass();
        let snapshot = self.state.nodes.read().clone();
        let mut applied = 0;
        for plugin in &self.plugins {
            let actions = plugin.create_pages(&snapshot).await?;
            applied += self.apply_actions(actions).await?;
        }

        // pages created outside a plugin are never stale
        let owners: BTreeSet<&str> = self.plugins.iter().map(|p| p.name()).collect();
        let stale: Vec<_> = self
            .state
            .pages
            .read()
            .stale_pages()
            .into_iter()
            .filter(|page| owners.contains(page.owner.as_str()))
            .collect();
        if !stale.is_empty() {
            info!(pages = stale.len(), "Deleting stale pages");
        }
        applied += self
            .apply_actions(stale.into_iter().map(Action::DeletePage).collect())
            .await?;
        Ok(applied)
    }

    /// Apply actions in order
    ///
    /// Created or updated nodes are offered to every plugin's `on_create_node` and created
    /// pages to `on_create_page`; their actions run after the current batch. Deleting a
    /// node deletes its children.
    pub async fn apply_actions(&self, actions: Vec<Action>) -> Result<usize, BuildError> {
        let mut queue: VecDeque<Action> = actions.into();
        let mut applied = 0;

        while let Some(action) = queue.pop_front() {
            if let Action::CreateNode(node) | Action::UpdateNode { node, .. } = &action {
                if self.state.nodes.read().get_node(&node.id) == Some(node) {
                    continue;
                }
            }

            let created_page = match &action {
                Action::CreatePage(page) => Some(page.clone()),
                _ => None,
            };

            match apply(&self.state, action)? {
                Applied::Node(touched) if touched.kind == MutationKind::Deleted => {
                    applied += 1;
                    let children: Vec<Action> = self
                        .state
                        .nodes
                        .read()
                        .get_all_nodes()
                        .into_iter()
                        .filter(|n| n.parent.as_deref() == Some(touched.node_id.as_str()))
                        .map(|n| Action::DeleteNode(n.clone()))
                        .collect();
                    queue.extend(children);
                }
                Applied::Node(touched) => {
                    applied += 1;
                    let node = self.state.nodes.read().get_node(&touched.node_id).cloned();
                    if let Some(node) = node {
                        for plugin in &self.plugins {
                            queue.extend(plugin.on_create_node(&node).await?);
                        }
                    }
                }
                Applied::Other => applied += 1,
                Applied::Noop => {}
            }

            // unchanged pages still mark their derived pages as touched
            if let Some(page) = created_page {
                for plugin in &self.plugins {
                    queue.extend(plugin.on_create_page(&page).await?);
                }
            }
        }
        Ok(applied)
    }

    fn refresh_schema(&self, flags: &Flags) -> bool {
        let refresh = {
            let nodes = self.state.nodes.read();
            let worker_fields: BTreeMap<String, Vec<WorkerField>> = nodes
                .types()
                .into_iter()
                .map(|type_name| {
                    let fields = self
                        .plugins
                        .iter()
                        .flat_map(|p| p.worker_fields(&type_name))
                        .collect();
                    (type_name, fields)
                })
                .collect();
            let mut cache = self.state.schema_cache.lock();
            refresh_schema(
                &mut cache,
                &nodes,
                &flags.dirty_node_types,
                &worker_fields,
                &self.config.schema,
            )
        };
        *self.schema.write() = refresh.schema;
        refresh.rebuilt
    }

    fn dirty_query_ids(&self, flags: &Flags, schema_rebuilt: bool) -> BTreeSet<String> {
        let known = self.state.pages.read().known_query_ids();
        let mut dirty = self.state.graph.lock().compute_dirty_query_ids(
            &flags.dirty_node_ids,
            &flags.dirty_node_types,
            &known,
        );
        dirty.extend(
            flags
                .dirty_query_ids
                .iter()
                .chain(&flags.dirty_page_paths)
                .filter(|id| known.contains(*id))
                .cloned(),
        );
        if schema_rebuilt {
            debug!(queries = known.len(), "Schema rebuilt, re-running every query");
            return known;
        }
        dirty
    }

    /// Keep every query of a failed pass dirty
    ///
    /// Queries that did finish come back unchanged next time and cost only a re-run.
    fn requeue_after_failure(&self, dirty: &BTreeSet<String>, schema_rebuilt: bool) {
        let mut flags = self.state.flags.lock();
        for query_id in dirty {
            flags.query_job(query_id);
        }
        if schema_rebuilt {
            flags.schema();
        }
        warn!(queries = dirty.len(), "Pass failed, queries stay dirty");
    }

    async fn run_queries(&self, dirty: &BTreeSet<String>) -> Result<usize, BuildError> {
        let jobs = QueryScheduler::build_jobs(&self.state.pages.read(), dirty);
        let count = self.scheduler.run_queries(jobs).await?;
        self.writer.wait_till_drained().await?;
        Ok(count)
    }

    /// Stop the queues and the worker pool
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        self.writer.stop().await;
        if let Some(pool) = &self.pool {
            pool.shutdown().await;
        }
        if let Some(db) = &self.db {
            if let Err(e) = db.flush() {
                warn!(error = %e, "Failed to flush build state");
            }
        }
    }

    pub fn mode(&self) -> BuildMode {
        self.config.mode
    }
}
