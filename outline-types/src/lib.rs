//! Core type definitions for the outline sync engine.
//!
//! This crate defines the types shared by every other crate:
//! - Entity identifiers for accounts, documents, rows and images
//! - Change token keys
//! - Remote record shapes (outline, row, image)

mod ids;
mod record;

pub use ids::{AccountId, ChangeTokenKey, EntityId, RecordType};
pub use record::{ChangeTag, ImageRecord, OutlineRecord, RecordBody, RemoteRecord, RowRecord};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid entity id: {0}")]
    InvalidEntityId(String),
}
