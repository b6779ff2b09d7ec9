//! Pages, static queries and redirects
//!
//! The page registry is the universe of query ids the dirty tracker reasons about:
//! every page path and every static-query id. Plugins recreate pages on every pass;
//! pages they stop creating are stale and get deleted.

use crate::hashing::compute_hash;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Prefix that separates static query ids from page paths
pub const STATIC_QUERY_PREFIX: &str = "sq--";

/// A page to be rendered, identified by its path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDescriptor {
    pub path: String,
    /// Component (template) path; its registered query is the page query
    pub component: String,
    #[serde(default)]
    pub component_chunk_name: String,
    #[serde(default = "empty_context")]
    pub context: Value,
    #[serde(default)]
    pub match_path: Option<String>,
    /// Plugin that created the page
    #[serde(default)]
    pub owner: String,
}

fn empty_context() -> Value {
    Value::Object(Map::new())
}

impl PageDescriptor {
    pub fn new(path: impl Into<String>, component: impl Into<String>) -> Self {
        let component = component.into();
        PageDescriptor {
            path: path.into(),
            component_chunk_name: chunk_name_for(&component),
            component,
            context: empty_context(),
            match_path: None,
            owner: String::new(),
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    /// Whether two descriptors would produce the same query job
    pub fn same_as(&self, other: &PageDescriptor) -> bool {
        self.component == other.component
            && self.context == other.context
            && self.match_path == other.match_path
    }
}

/// Derive a chunk name from a component path: `src/templates/blog-post.js` -> `component---src-templates-blog-post-js`
pub fn chunk_name_for(component: &str) -> String {
    let slug: String = component
        .trim_start_matches("./")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    format!("component---{}", slug.trim_matches('-'))
}

/// A standalone query that is not bound to a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticQueryDescriptor {
    pub id: String,
    pub component: String,
    pub query: String,
}

impl StaticQueryDescriptor {
    pub fn new(component: impl Into<String>, query: impl Into<String>) -> Self {
        let query = query.into();
        let id = static_query_id(&query);
        StaticQueryDescriptor {
            id,
            component: component.into(),
            query,
        }
    }
}

/// Id of a static query: prefix plus a short hash of its text
pub fn static_query_id(query: &str) -> String {
    let hash = compute_hash(query.as_bytes());
    format!("{}{}", STATIC_QUERY_PREFIX, &hash[..16])
}

pub fn is_static_query_id(id: &str) -> bool {
    id.starts_with(STATIC_QUERY_PREFIX)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Redirect {
    pub from_path: String,
    pub to_path: String,
    #[serde(default)]
    pub is_permanent: bool,
    #[serde(default)]
    pub redirect_in_browser: bool,
}

/// Result of registering a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageChange {
    New,
    Changed,
    Unchanged,
}

/// All pages, component queries, static queries and redirects
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageRegistry {
    pages: BTreeMap<String, PageDescriptor>,
    /// component path -> page query text
    components: BTreeMap<String, String>,
    static_queries: BTreeMap<String, StaticQueryDescriptor>,
    redirects: Vec<Redirect>,
    #[serde(skip)]
    touched: BTreeSet<String>,
}

impl PageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a page-creation round; pages not recreated before [`Self::stale_pages`] are stale
    pub fn begin_pass(&mut self) {
        self.touched.clear();
    }

    pub fn create_page(&mut self, page: PageDescriptor) -> PageChange {
        self.touched.insert(page.path.clone());
        let change = match self.pages.get(&page.path) {
            None => PageChange::New,
            Some(existing) if existing.same_as(&page) => PageChange::Unchanged,
            Some(_) => PageChange::Changed,
        };
        self.pages.insert(page.path.clone(), page);
        change
    }

    pub fn delete_page(&mut self, path: &str) -> Option<PageDescriptor> {
        self.touched.remove(path);
        self.pages.remove(path)
    }

    /// Pages that exist but were not created since the last [`Self::begin_pass`]
    pub fn stale_pages(&self) -> Vec<PageDescriptor> {
        self.pages
            .values()
            .filter(|p| !self.touched.contains(&p.path))
            .cloned()
            .collect()
    }

    pub fn get_page(&self, path: &str) -> Option<&PageDescriptor> {
        self.pages.get(path)
    }

    pub fn pages(&self) -> impl Iterator<Item = &PageDescriptor> {
        self.pages.values()
    }

    /// Register the query text of a component; returns the paths of pages whose query changed
    pub fn set_component_query(&mut self, component: &str, query: &str) -> Vec<String> {
        if self.components.get(component).map(String::as_str) == Some(query) {
            return Vec::new();
        }
        self.components
            .insert(component.to_string(), query.to_string());
        self.pages
            .values()
            .filter(|p| p.component == component)
            .map(|p| p.path.clone())
            .collect()
    }

    /// Page query text for a component; a component without a query has an empty one
    pub fn component_query(&self, component: &str) -> &str {
        self.components
            .get(component)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Register a static query; returns its id and whether it is new
    pub fn replace_static_query(&mut self, descriptor: StaticQueryDescriptor) -> (String, bool) {
        let id = descriptor.id.clone();
        let is_new = self.static_queries.get(&id) != Some(&descriptor);
        self.static_queries.insert(id.clone(), descriptor);
        (id, is_new)
    }

    pub fn get_static_query(&self, id: &str) -> Option<&StaticQueryDescriptor> {
        self.static_queries.get(id)
    }

    pub fn static_queries(&self) -> impl Iterator<Item = &StaticQueryDescriptor> {
        self.static_queries.values()
    }

    /// Add a redirect unless an equal one exists; returns true when added
    pub fn create_redirect(&mut self, redirect: Redirect) -> bool {
        if self.redirects.contains(&redirect) {
            return false;
        }
        self.redirects.push(redirect);
        true
    }

    pub fn redirects(&self) -> &[Redirect] {
        &self.redirects
    }

    /// Every query id currently known: page paths and static query ids
    pub fn known_query_ids(&self) -> BTreeSet<String> {
        self.pages
            .keys()
            .chain(self.static_queries.keys())
            .cloned()
            .collect()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chunk_name() {
        assert_eq!(
            chunk_name_for("src/templates/blog-post.js"),
            "component---src-templates-blog-post-js"
        );
    }

    #[test]
    fn test_page_change_detection() {
        let mut registry = PageRegistry::new();
        let page = PageDescriptor::new("/a/", "src/templates/post.js").with_context(json!({"id": "a"}));
        assert_eq!(registry.create_page(page.clone()), PageChange::New);
        assert_eq!(registry.create_page(page.clone()), PageChange::Unchanged);
        let changed = page.with_context(json!({"id": "b"}));
        assert_eq!(registry.create_page(changed), PageChange::Changed);
    }

    #[test]
    fn test_untouched_pages_are_stale() {
        let mut registry = PageRegistry::new();
        registry.create_page(PageDescriptor::new("/a/", "post"));
        registry.create_page(PageDescriptor::new("/b/", "post"));

        registry.begin_pass();
        registry.create_page(PageDescriptor::new("/a/", "post"));

        let stale: Vec<String> = registry.stale_pages().into_iter().map(|p| p.path).collect();
        assert_eq!(stale, vec!["/b/".to_string()]);
    }

    #[test]
    fn test_redirects_are_deduplicated() {
        let mut registry = PageRegistry::new();
        let redirect = Redirect {
            from_path: "/old".into(),
            to_path: "/new".into(),
            is_permanent: true,
            redirect_in_browser: false,
        };
        assert!(registry.create_redirect(redirect.clone()));
        assert!(!registry.create_redirect(redirect));
        assert_eq!(registry.redirects().len(), 1);
    }

    #[test]
    fn test_known_query_ids_include_static_queries() {
        let mut registry = PageRegistry::new();
        registry.create_page(PageDescriptor::new("/a/", "post"));
        let (id, is_new) =
            registry.replace_static_query(StaticQueryDescriptor::new("src/header.js", "{\"all\":\"Site\"}"));
        assert!(is_new);
        assert!(is_static_query_id(&id));
        let ids = registry.known_query_ids();
        assert!(ids.contains("/a/"));
        assert!(ids.contains(&id));
    }

    #[test]
    fn test_component_query_change_lists_pages() {
        let mut registry = PageRegistry::new();
        registry.create_page(PageDescriptor::new("/a/", "post"));
        registry.create_page(PageDescriptor::new("/b/", "list"));
        assert_eq!(registry.set_component_query("post", "q1"), vec!["/a/".to_string()]);
        assert!(registry.set_component_query("post", "q1").is_empty());
        assert_eq!(registry.component_query("post"), "q1");
        assert_eq!(registry.component_query("missing"), "");
    }
}
