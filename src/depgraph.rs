//! Dependency graph and dirty tracker
//!
//! Edges are only ever added, as a side effect of a query declaring what it read. A
//! query's older edges are never removed; they can only cause over-invalidation.
//!
//! Queries with no edges at all (never run, or never read a node) are scheduled once per
//! creation through the seen-without-deps memo. Deleting a page clears its memo entry so
//! a recreated page runs again.

use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub type QueryId = String;

/// A read declared by a query while it executed
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dependency {
    Node { query_id: QueryId, node_id: NodeId },
    Type { query_id: QueryId, node_type: String },
    PageNode { page_path: String, node_id: NodeId },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyGraph {
    /// node id -> queries that read it
    query_depends_on_node: BTreeMap<NodeId, BTreeSet<QueryId>>,
    /// node type -> queries that read the whole collection
    query_depends_on_node_collection: BTreeMap<String, BTreeSet<QueryId>>,
    /// page path -> nodes the page descriptor was derived from
    page_depends_on_node: BTreeMap<String, BTreeSet<NodeId>>,
    /// query id -> hash of the last stored result
    query_results: BTreeMap<QueryId, String>,
    seen_without_deps: BTreeSet<QueryId>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_node_dependency(&mut self, query_id: &str, node_id: &str) {
        self.query_depends_on_node
            .entry(node_id.to_string())
            .or_default()
            .insert(query_id.to_string());
    }

    pub fn record_type_dependency(&mut self, query_id: &str, node_type: &str) {
        self.query_depends_on_node_collection
            .entry(node_type.to_string())
            .or_default()
            .insert(query_id.to_string());
    }

    pub fn record_page_node_dependency(&mut self, page_path: &str, node_id: &str) {
        self.page_depends_on_node
            .entry(page_path.to_string())
            .or_default()
            .insert(node_id.to_string());
    }

    pub fn record(&mut self, dependency: &Dependency) {
        match dependency {
            Dependency::Node { query_id, node_id } => self.record_node_dependency(query_id, node_id),
            Dependency::Type {
                query_id,
                node_type,
            } => self.record_type_dependency(query_id, node_type),
            Dependency::PageNode { page_path, node_id } => {
                self.record_page_node_dependency(page_path, node_id)
            }
        }
    }

    pub fn record_all<'a>(&mut self, dependencies: impl IntoIterator<Item = &'a Dependency>) {
        for dependency in dependencies {
            self.record(dependency);
        }
    }

    /// Queries invalidated by the given mutations, plus untracked queries not yet retried
    ///
    /// `known_query_ids` is the current universe of pages and static queries. Edges to
    /// queries outside it are ignored.
    pub fn compute_dirty_query_ids(
        &mut self,
        mutated_node_ids: &BTreeSet<NodeId>,
        mutated_node_types: &BTreeSet<String>,
        known_query_ids: &BTreeSet<QueryId>,
    ) -> BTreeSet<QueryId> {
        let mut dirty: BTreeSet<QueryId> = BTreeSet::new();

        for node_id in mutated_node_ids {
            if let Some(queries) = self.query_depends_on_node.get(node_id) {
                dirty.extend(queries.iter().cloned());
            }
        }
        for node_type in mutated_node_types {
            if let Some(queries) = self.query_depends_on_node_collection.get(node_type) {
                dirty.extend(queries.iter().cloned());
            }
        }
        for (page_path, nodes) in &self.page_depends_on_node {
            if nodes.iter().any(|n| mutated_node_ids.contains(n)) {
                dirty.insert(page_path.clone());
            }
        }

        let untracked = self.find_ids_without_dependencies(known_query_ids);
        debug!(
            tracked = dirty.len(),
            untracked = untracked.len(),
            "Computed dirty query ids"
        );
        dirty.extend(untracked);
        dirty.retain(|id| known_query_ids.contains(id));
        dirty
    }

    fn find_ids_without_dependencies(&mut self, known_query_ids: &BTreeSet<QueryId>) -> BTreeSet<QueryId> {
        let tracked = self.tracked_query_ids();
        let untracked: BTreeSet<QueryId> = known_query_ids
            .iter()
            .filter(|id| !tracked.contains(*id) && !self.seen_without_deps.contains(*id))
            .cloned()
            .collect();
        self.seen_without_deps.extend(untracked.iter().cloned());
        untracked
    }

    fn tracked_query_ids(&self) -> BTreeSet<&QueryId> {
        self.query_depends_on_node
            .values()
            .chain(self.query_depends_on_node_collection.values())
            .flatten()
            .collect()
    }

    /// Forget that a query was already retried without dependencies
    pub fn clear_seen(&mut self, query_id: &str) {
        self.seen_without_deps.remove(query_id);
    }

    /// A deleted page loses its memo entry and stored result hash
    pub fn forget_page(&mut self, page_path: &str) {
        self.clear_seen(page_path);
        self.query_results.remove(page_path);
    }

    pub fn result_hash(&self, query_id: &str) -> Option<&str> {
        self.query_results.get(query_id).map(String::as_str)
    }

    pub fn set_result_hash(&mut self, query_id: &str, hash: &str) {
        self.query_results
            .insert(query_id.to_string(), hash.to_string());
    }

    pub fn queries_depending_on_node(&self, node_id: &str) -> BTreeSet<QueryId> {
        self.query_depends_on_node
            .get(node_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn queries_depending_on_type(&self, node_type: &str) -> BTreeSet<QueryId> {
        self.query_depends_on_node_collection
            .get(node_type)
            .cloned()
            .unwrap_or_default()
    }

    pub fn edge_count(&self) -> usize {
        self.query_depends_on_node.values().map(BTreeSet::len).sum::<usize>()
            + self
                .query_depends_on_node_collection
                .values()
                .map(BTreeSet::len)
                .sum::<usize>()
            + self.page_depends_on_node.values().map(BTreeSet::len).sum::<usize>()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
