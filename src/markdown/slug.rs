//! Heading anchors

use regex::Regex;
use std::sync::OnceLock;
use unicode_segmentation::UnicodeSegmentation;

static HYPHEN_RUNS: OnceLock<Regex> = OnceLock::new();

/// Lowercased, whitespace and underscores to hyphens, punctuation dropped
///
/// Unicode letters are kept whole, so `Café` becomes `café`.
pub fn slugify(input: &str) -> String {
    let cleaned: String = input
        .to_lowercase()
        .graphemes(true)
        .filter_map(|g| {
            let c = g.chars().next()?;
            if g.chars().all(char::is_whitespace) || c == '_' || c == '-' {
                Some("-")
            } else if c.is_alphanumeric() {
                Some(g)
            } else {
                None
            }
        })
        .collect();

    let hyphens = HYPHEN_RUNS.get_or_init(|| {
        Regex::new(r"-+").unwrap_or_else(|e| unreachable!("hyphen pattern is valid: {}", e))
    });
    hyphens.replace_all(&cleaned, "-").trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_and_punctuation() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("Setup & Use"), "setup-use");
        assert_eq!(slugify("What's new?"), "whats-new");
        assert_eq!(slugify("C++ Programming"), "c-programming");
    }

    #[test]
    fn test_whitespace_underscores_and_edges() {
        assert_eq!(slugify("  many   spaces_here  "), "many-spaces-here");
        assert_eq!(slugify("-Leading and trailing-"), "leading-and-trailing");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_unicode_letters_survive() {
        assert_eq!(slugify("Café Crème"), "café-crème");
    }
}
