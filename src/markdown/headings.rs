//! Headings and tables of contents
//!
//! Headings are read from the CommonMark event stream, so setext headings count and
//! `#` lines inside fenced or indented code do not.

use super::slug::slugify;
use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};

#[derive(Debug, Clone, PartialEq)]
pub struct Heading {
    pub value: String,
    pub depth: u8,
    pub anchor: String,
}

pub fn parse_headings(markdown: &str) -> Vec<Heading> {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let mut headings = Vec::new();
    let mut current: Option<(u8, String)> = None;
    for event in Parser::new_ext(markdown, options) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                current = Some((level as u8, String::new()));
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some((_, value)) = current.as_mut() {
                    value.push_str(&text);
                }
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some((depth, value)) = current.take() {
                    let value = value.trim().to_string();
                    if !value.is_empty() {
                        headings.push(Heading {
                            anchor: slugify(&value),
                            value,
                            depth,
                        });
                    }
                }
            }
            _ => {}
        }
    }
    headings
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Nested `<ul>` list of links to each heading up to `max_depth`
pub fn render_table_of_contents(headings: &[Heading], base_href: &str, max_depth: u8) -> String {
    let mut out = String::new();
    let mut open: Vec<u8> = Vec::new();
    for heading in headings.iter().filter(|h| h.depth <= max_depth) {
        while open.last().is_some_and(|top| *top > heading.depth) {
            out.push_str("</li></ul>");
            open.pop();
        }
        if open.last() == Some(&heading.depth) {
            out.push_str("</li>");
        } else {
            out.push_str("<ul>");
            open.push(heading.depth);
        }
        out.push_str(&format!(
            "<li><a href=\"{}#{}\">{}</a>",
            escape_html(base_href),
            heading.anchor,
            escape_html(&heading.value)
        ));
    }
    while open.pop().is_some() {
        out.push_str("</li></ul>");
    }
    out
}
