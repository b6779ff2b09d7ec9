//! Type conflict reporting
//!
//! Conflicts are recoverable: inference continues with the conflicting field left out.

use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeConflict {
    pub type_name: String,
    /// Dotted field path, `[]` marking list elements
    pub field_path: String,
    pub shapes: Vec<String>,
    /// Node where the conflicting shape was first seen
    pub node_id: String,
}

#[derive(Debug, Default)]
pub struct TypeConflictReporter {
    conflicts: Vec<TypeConflict>,
}

impl TypeConflictReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, conflict: TypeConflict) {
        self.conflicts.push(conflict);
    }

    pub fn conflicts(&self) -> &[TypeConflict] {
        &self.conflicts
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Emit every conflict as a warning
    pub fn print_conflicts(&self) {
        for conflict in &self.conflicts {
            warn!(
                type_name = %conflict.type_name,
                field = %conflict.field_path,
                shapes = %conflict.shapes.join(", "),
                node_id = %conflict.node_id,
                "There are conflicting field types in your data; the field was left out of the inferred type"
            );
        }
    }
}
