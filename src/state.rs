//! Site state container
//!
//! One explicit handle to every long-lived structure of a build: the node store, the
//! page registry, the dependency graph, the schema cache and the pass flags. Cloning the
//! handle shares the same state.
//!
//! Nodes are read through [`SiteState::nodes`] and written only by applying actions, so
//! every node mutation is flagged dirty and saved by the next [`SiteState::persist`].

use crate::actions::Applied;
use crate::depgraph::DependencyGraph;
use crate::error::StoreError;
use crate::flags::Flags;
use crate::pages::PageRegistry;
use crate::schema::SchemaCache;
use crate::store::{NodeStore, SledStateStore, Touched};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::sync::Arc;
use tracing::{debug, info};

const PAGES_KEY: &str = "pages";
const GRAPH_KEY: &str = "dependency_graph";
const SCHEMA_CACHE_KEY: &str = "schema_cache";

#[derive(Clone, Default)]
pub struct SiteState {
    pub(crate) nodes: Arc<RwLock<NodeStore>>,
    pub pages: Arc<RwLock<PageRegistry>>,
    pub graph: Arc<Mutex<DependencyGraph>>,
    pub schema_cache: Arc<Mutex<SchemaCache>>,
    pub flags: Arc<Mutex<Flags>>,
    /// Node mutations not yet written to disk
    unsaved: Arc<Mutex<Vec<Touched>>>,
}

impl SiteState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read access to the node store
    pub fn nodes(&self) -> RwLockReadGuard<'_, NodeStore> {
        self.nodes.read()
    }

    pub(crate) fn node_touched(&self, touched: Touched) -> Applied {
        self.flags.lock().node(&touched.node_type, &touched.node_id);
        self.unsaved.lock().push(touched.clone());
        Applied::Node(touched)
    }

    /// Restore state saved by a previous run; flags always start empty
    pub fn load(db: &SledStateStore) -> Result<Self, StoreError> {
        let nodes = db.load_nodes()?;
        let pages: PageRegistry = db.get_document(PAGES_KEY)?.unwrap_or_default();
        let graph: DependencyGraph = db.get_state(GRAPH_KEY)?.unwrap_or_default();
        let schema_cache: SchemaCache = db.get_state(SCHEMA_CACHE_KEY)?.unwrap_or_default();
        info!(
            nodes = nodes.len(),
            pages = pages.pages().count(),
            edges = graph.edge_count(),
            "Loaded build state"
        );
        Ok(Self {
            nodes: Arc::new(RwLock::new(nodes)),
            pages: Arc::new(RwLock::new(pages)),
            graph: Arc::new(Mutex::new(graph)),
            schema_cache: Arc::new(Mutex::new(schema_cache)),
            flags: Arc::new(Mutex::new(Flags::new())),
            unsaved: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Write everything that must survive a restart
    pub fn persist(&self, db: &SledStateStore) -> Result<(), StoreError> {
        let touched = std::mem::take(&mut *self.unsaved.lock());
        db.save_touched_nodes(&self.nodes.read(), &touched)?;
        db.put_document(PAGES_KEY, &*self.pages.read())?;
        db.put_state(GRAPH_KEY, &*self.graph.lock())?;
        db.put_state(SCHEMA_CACHE_KEY, &*self.schema_cache.lock())?;
        db.flush()?;
        debug!(nodes = touched.len(), "Persisted build state");
        Ok(())
    }

    /// Forget everything, in memory only
    pub fn reset(&self) {
        self.nodes.write().reset();
        self.pages.write().reset();
        self.graph.lock().reset();
        self.schema_cache.lock().reset();
        self.flags.lock().drain();
        self.unsaved.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{apply, Action};
    use crate::node::Node;
    use crate::pages::PageDescriptor;
    use crate::store::NodeReader;
    use tempfile::TempDir;

    #[test]
    fn test_state_survives_restart_without_flags() {
        let temp_dir = TempDir::new().unwrap();
        {
            let db = SledStateStore::new(temp_dir.path()).unwrap();
            let state = SiteState::new();
            apply(&state, Action::CreateNode(Node::new("a", "Post", "d1"))).unwrap();
            apply(&state, Action::CreatePage(PageDescriptor::new("/a/", "post"))).unwrap();
            state.graph.lock().record_node_dependency("/a/", "a");
            state.graph.lock().set_result_hash("/a/", "h1");
            state.persist(&db).unwrap();
        }

        let db = SledStateStore::new(temp_dir.path()).unwrap();
        let state = SiteState::load(&db).unwrap();
        assert!(state.nodes.read().get_node("a").is_some());
        assert!(state.pages.read().get_page("/a/").is_some());
        assert_eq!(state.graph.lock().result_hash("/a/"), Some("h1"));
        assert!(state.flags.lock().is_empty());
    }
}
