//! Per-pass dirty accumulator
//!
//! Mutated by every applied action and by the query runner, drained once per build
//! pass. Never persisted.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flags {
    pub dirty_node_types: BTreeSet<String>,
    pub dirty_node_ids: BTreeSet<String>,
    /// Queries that must run regardless of dependency tracking
    pub dirty_query_ids: BTreeSet<String>,
    /// Pages created or changed this pass
    pub dirty_page_paths: BTreeSet<String>,
    pub schema_dirty: bool,
    /// Queries whose result hash changed this pass
    pub changed_query_results: BTreeSet<String>,
    /// Pages whose result artifact was written
    pub page_data_written: BTreeSet<String>,
    pub static_query_changed: bool,
    pub redirects_changed: bool,
    pub match_paths_changed: bool,
}

impl Flags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&mut self, node_type: &str, node_id: &str) {
        self.dirty_node_types.insert(node_type.to_string());
        self.dirty_node_ids.insert(node_id.to_string());
    }

    pub fn query_job(&mut self, query_id: &str) {
        self.dirty_query_ids.insert(query_id.to_string());
    }

    pub fn page(&mut self, path: &str) {
        self.dirty_page_paths.insert(path.to_string());
    }

    pub fn schema(&mut self) {
        self.schema_dirty = true;
    }

    pub fn query_result(&mut self, query_id: &str) {
        self.changed_query_results.insert(query_id.to_string());
    }

    pub fn page_data(&mut self, path: &str) {
        self.page_data_written.insert(path.to_string());
    }

    pub fn static_query(&mut self) {
        self.static_query_changed = true;
    }

    pub fn redirects(&mut self) {
        self.redirects_changed = true;
    }

    pub fn match_paths(&mut self) {
        self.match_paths_changed = true;
    }

    /// The client bundle must be rebuilt
    pub fn bundling_dirty(&self) -> bool {
        self.static_query_changed || self.redirects_changed || self.match_paths_changed
    }

    pub fn is_empty(&self) -> bool {
        *self == Flags::default()
    }

    /// Read and reset
    pub fn drain(&mut self) -> Flags {
        std::mem::take(self)
    }
}
