//! CLI domain: parse, route, output, and presentation only.
//! Build orchestration lives in the pipeline; this layer picks a command and formats results.

mod output;
mod parse;
mod presentation;
mod route;

pub use output::map_error;
pub use parse::{Cli, Commands, OutputFormat};
pub use presentation::{
    format_build_report_json, format_build_report_text, format_status_json, format_status_text,
    SiteStatus, TypeCount,
};
pub use route::RunContext;
