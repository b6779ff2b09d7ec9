//! CLI presentation: text and json formatters for build reports and site status.

use crate::error::BuildError;
use crate::pipeline::BuildReport;
use crate::state::SiteState;
use crate::store::NodeReader;
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use owo_colors::OwoColorize;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TypeCount {
    pub node_type: String,
    pub nodes: usize,
}

/// Saved build state at a glance
#[derive(Debug, Clone, Serialize)]
pub struct SiteStatus {
    pub nodes: usize,
    pub types: Vec<TypeCount>,
    pub pages: usize,
    pub static_queries: usize,
    pub redirects: usize,
    pub dependency_edges: usize,
}

impl SiteStatus {
    pub fn from_state(state: &SiteState) -> Self {
        let nodes = state.nodes.read();
        let pages = state.pages.read();
        let types = nodes
            .types()
            .into_iter()
            .map(|node_type| TypeCount {
                nodes: nodes.get_nodes_by_type(&node_type).len(),
                node_type,
            })
            .collect();
        SiteStatus {
            nodes: nodes.len(),
            types,
            pages: pages.pages().count(),
            static_queries: pages.static_queries().count(),
            redirects: pages.redirects().len(),
            dependency_edges: state.graph.lock().edge_count(),
        }
    }
}

pub fn format_status_text(status: &SiteStatus) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n", "Site status".bold()));
    out.push_str(&format!(
        "  nodes: {}  pages: {}  static queries: {}  redirects: {}  dependency edges: {}\n",
        status.nodes, status.pages, status.static_queries, status.redirects, status.dependency_edges
    ));
    if status.types.is_empty() {
        out.push_str("  no nodes yet; run `sitegraph build`\n");
        return out;
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Type", "Nodes"]);
    for entry in &status.types {
        table.add_row(vec![entry.node_type.clone(), entry.nodes.to_string()]);
    }
    out.push_str(&table.to_string());
    out
}

pub fn format_status_json(status: &SiteStatus) -> Result<String, BuildError> {
    Ok(serde_json::to_string_pretty(status)?)
}

pub fn format_build_report_text(report: &BuildReport) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["", ""]);
    table.add_row(vec!["Nodes".to_string(), report.nodes.to_string()]);
    table.add_row(vec!["Pages".to_string(), report.pages.to_string()]);
    table.add_row(vec!["Queries run".to_string(), report.queries_run.to_string()]);
    table.add_row(vec![
        "Results changed".to_string(),
        report.results_changed.len().to_string(),
    ]);
    table.add_row(vec![
        "Page data written".to_string(),
        report.pages_written.len().to_string(),
    ]);
    table.add_row(vec![
        "Schema rebuilt".to_string(),
        yes_no(report.schema_rebuilt).to_string(),
    ]);
    table.add_row(vec![
        "Bundle dirty".to_string(),
        yes_no(report.bundling_dirty).to_string(),
    ]);

    let mut out = format!(
        "{} at {} in {}ms\n{}\n",
        "Build pass complete".green(),
        report.started_at,
        report.duration_ms,
        table
    );
    if !report.pages_to_render.is_empty() {
        out.push_str(&format!("{}\n", "Pages to render:".bold()));
        for path in &report.pages_to_render {
            out.push_str(&format!("  {}\n", path));
        }
    }
    out
}

pub fn format_build_report_json(report: &BuildReport) -> Result<String, BuildError> {
    Ok(serde_json::to_string_pretty(report)?)
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
