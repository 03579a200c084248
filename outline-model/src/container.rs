//! Row containers.
//!
//! Both the outline root and every row hold an ordered list of child row ids.
//! [`ContainerId`] addresses either kind; [`RowContainer`] is the read side
//! they share.

use std::fmt;

/// Address of something that holds child rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContainerId {
    /// The outline's top level.
    Root,
    /// A row, by row id.
    Row(String),
}

impl ContainerId {
    #[must_use]
    pub fn row(id: impl Into<String>) -> Self {
        Self::Row(id.into())
    }

    #[must_use]
    pub fn row_id(&self) -> Option<&str> {
        match self {
            Self::Root => None,
            Self::Row(id) => Some(id),
        }
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => f.write_str("root"),
            Self::Row(id) => write!(f, "row {id}"),
        }
    }
}

/// Read access to an ordered list of child rows.
pub trait RowContainer {
    /// Child row ids in display order.
    fn row_ids(&self) -> &[String];

    fn row_count(&self) -> usize {
        self.row_ids().len()
    }

    fn first_index(&self, row_id: &str) -> Option<usize> {
        self.row_ids().iter().position(|id| id == row_id)
    }

    fn contains_row(&self, row_id: &str) -> bool {
        self.first_index(row_id).is_some()
    }
}
