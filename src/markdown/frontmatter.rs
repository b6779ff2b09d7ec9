//! YAML frontmatter

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrontmatterError {
    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Frontmatter must be a mapping, found {0}")]
    NotAMapping(&'static str),
}

static FRONTMATTER_REGEX: OnceLock<Regex> = OnceLock::new();

fn frontmatter_regex() -> &'static Regex {
    FRONTMATTER_REGEX.get_or_init(|| {
        Regex::new(r"(?s)\A\x{feff}?---[ \t]*\r?\n(?:(.*?)\r?\n)?---[ \t]*(?:\r?\n|\z)(.*)\z")
            .unwrap_or_else(|e| unreachable!("frontmatter pattern is valid: {}", e))
    })
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

/// Split `---` delimited YAML frontmatter from a markdown body
///
/// Without a frontmatter block the whole text is the body. An empty block yields no
/// fields.
pub fn parse_frontmatter(text: &str) -> Result<(Map<String, Value>, String), FrontmatterError> {
    let Some(captures) = frontmatter_regex().captures(text) else {
        return Ok((Map::new(), text.to_string()));
    };
    let yaml = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
    let body = captures.get(2).map(|m| m.as_str()).unwrap_or_default();

    let fields = match serde_yaml::from_str::<Value>(yaml)? {
        Value::Null => Map::new(),
        Value::Object(map) => map,
        other => return Err(FrontmatterError::NotAMapping(kind(&other))),
    };
    Ok((fields, body.trim_start_matches(['\r', '\n']).to_string()))
}
