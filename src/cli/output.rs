//! CLI output: error mapping from build errors to stable CLI text.

use crate::error::BuildError;

/// Map a build error to the text printed on stderr
pub fn map_error(e: &BuildError) -> String {
    match e {
        BuildError::QueryFailed { .. } => format!("Query failed\n{}", e),
        BuildError::Config(message) => format!("Configuration error: {}", message),
        other => other.to_string(),
    }
}
