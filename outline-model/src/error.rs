//! Error types for tree mutations.

use outline_types::EntityId;
use thiserror::Error;

/// Result type for outline operations.
pub type OutlineResult<T> = Result<T, OutlineError>;

/// Errors raised by caller mistakes. Tree state problems are repaired, not reported here.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OutlineError {
    /// No row with this id exists in the outline.
    #[error("row not found: {0}")]
    RowNotFound(String),

    /// A row cannot become a child of itself or of one of its descendants.
    #[error("cannot move row {row} under {parent}")]
    CyclicMove { row: String, parent: String },

    /// The id names an entity in a different document.
    #[error("entity {0} does not belong to this outline")]
    ForeignEntity(EntityId),

    /// The row is already present in the outline.
    #[error("row already exists: {0}")]
    DuplicateRow(String),
}
