//! Mutation actions
//!
//! Everything that changes site state arrives as an [`Action`]. Plugins return actions,
//! the build driver applies them in order, and each applied action records what it
//! touched in the pass flags.

use crate::error::StoreError;
use crate::node::Node;
use crate::pages::{PageChange, PageDescriptor, Redirect, StaticQueryDescriptor};
use crate::state::SiteState;
use crate::store::Touched;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    CreateNode(Node),
    /// Complete replacement of a node; `previous` is the record being replaced
    UpdateNode {
        node: Node,
        previous: Option<Node>,
    },
    DeleteNode(Node),
    CreatePage(PageDescriptor),
    DeletePage(PageDescriptor),
    CreateRedirect(Redirect),
    /// The page query of a component was extracted or changed
    SetComponentQuery {
        component: String,
        query: String,
    },
    ReplaceStaticQuery(StaticQueryDescriptor),
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::CreateNode(_) => "CREATE_NODE",
            Action::UpdateNode { .. } => "UPDATE_NODE",
            Action::DeleteNode(_) => "DELETE_NODE",
            Action::CreatePage(_) => "CREATE_PAGE",
            Action::DeletePage(_) => "DELETE_PAGE",
            Action::CreateRedirect(_) => "CREATE_REDIRECT",
            Action::SetComponentQuery { .. } => "SET_COMPONENT_QUERY",
            Action::ReplaceStaticQuery(_) => "REPLACE_STATIC_QUERY",
        }
    }
}

/// What applying an action did to the node store, if anything
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Node(Touched),
    Other,
    Noop,
}

/// Reduce one action onto the site state
///
/// Node invariant violations fail here, at the mutation call site.
pub fn apply(state: &SiteState, action: Action) -> Result<Applied, StoreError> {
    debug!(action = action.name(), "Applying action");
    match action {
        Action::CreateNode(node) => {
            let touched = state.nodes.write().create_node(node)?;
            Ok(state.node_touched(touched))
        }
        Action::UpdateNode { node, previous } => {
            let touched = state.nodes.write().update_node(node, previous.as_ref())?;
            Ok(state.node_touched(touched))
        }
        Action::DeleteNode(node) => match state.nodes.write().delete_node(&node)? {
            Some(touched) => Ok(state.node_touched(touched)),
            None => Ok(Applied::Noop),
        },
        Action::CreatePage(page) => {
            let path = page.path.clone();
            let match_path = page.match_path.clone();
            let mut pages = state.pages.write();
            let previous_match_path = pages.get_page(&path).and_then(|p| p.match_path.clone());
            let change = pages.create_page(page);
            let mut flags = state.flags.lock();
            match change {
                PageChange::Unchanged => return Ok(Applied::Noop),
                PageChange::New | PageChange::Changed => flags.page(&path),
            }
            if match_path != previous_match_path {
                flags.match_paths();
            }
            Ok(Applied::Other)
        }
        Action::DeletePage(page) => {
            let Some(removed) = state.pages.write().delete_page(&page.path) else {
                return Ok(Applied::Noop);
            };
            state.graph.lock().forget_page(&removed.path);
            let mut flags = state.flags.lock();
            flags.dirty_page_paths.remove(&removed.path);
            if removed.match_path.is_some() {
                flags.match_paths();
            }
            Ok(Applied::Other)
        }
        Action::CreateRedirect(redirect) => {
            if state.pages.write().create_redirect(redirect) {
                state.flags.lock().redirects();
                Ok(Applied::Other)
            } else {
                Ok(Applied::Noop)
            }
        }
        Action::SetComponentQuery { component, query } => {
            let affected = state.pages.write().set_component_query(&component, &query);
            let mut flags = state.flags.lock();
            for path in &affected {
                flags.query_job(path);
            }
            Ok(Applied::Other)
        }
        Action::ReplaceStaticQuery(descriptor) => {
            let (id, is_new) = state.pages.write().replace_static_query(descriptor);
            if !is_new {
                return Ok(Applied::Noop);
            }
            state.graph.lock().clear_seen(&id);
            state.flags.lock().query_job(&id);
            Ok(Applied::Other)
        }
    }
}
