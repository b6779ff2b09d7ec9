//! Markdown helpers shared by the content source and the field resolvers
//!
//! Frontmatter is YAML, headings come from the CommonMark event stream, and anchors use
//! the same slug rules everywhere.

pub mod frontmatter;
pub mod headings;
pub mod slug;

pub use frontmatter::{parse_frontmatter, FrontmatterError};
pub use headings::{parse_headings, render_table_of_contents, Heading};
pub use slug::slugify;
