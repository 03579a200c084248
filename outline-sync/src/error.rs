//! Error types for the sync layer.

use outline_types::{EntityId, RemoteRecord};
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors reported by a remote database, per operation or per record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RemoteError {
    #[error("zone not found")]
    ZoneNotFound,

    /// The user removed the zone from another device or the account settings.
    #[error("zone deleted by user")]
    UserDeletedZone,

    #[error("change token expired")]
    ChangeTokenExpired,

    /// The save was rejected because the server holds a newer version.
    #[error("server record changed: {}", .0.id)]
    ServerRecordChanged(Box<RemoteRecord>),

    /// The request carried too many records.
    #[error("request limit exceeded")]
    LimitExceeded,

    /// Some records of an atomic request failed; nothing was committed.
    #[error("partial failure ({} records)", .0.len())]
    PartialFailure(Vec<(EntityId, RemoteError)>),

    /// The record was fine but its batch failed.
    #[error("batch request failed")]
    BatchRequestFailed,

    #[error("unknown item")]
    UnknownItem,

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("service unavailable")]
    ServiceUnavailable { retry_after: Option<Duration> },

    #[error("zone busy")]
    ZoneBusy { retry_after: Option<Duration> },

    #[error("network unavailable")]
    NetworkUnavailable,

    #[error("remote error: {0}")]
    Other(String),
}

impl RemoteError {
    /// Whether waiting and repeating the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::ServiceUnavailable { .. }
                | Self::ZoneBusy { .. }
                | Self::NetworkUnavailable
                | Self::BatchRequestFailed
        )
    }

    /// The delay the server asked for, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after }
            | Self::ServiceUnavailable { retry_after }
            | Self::ZoneBusy { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The client was suspended while the operation was running.
    #[error("sync suspended")]
    Suspended,

    /// The zone was deleted by the user; local sync data must be reset.
    #[error("zone deleted by user")]
    UserDeletedZone,

    /// The zone was written by an incompatible schema version.
    #[error("incompatible zone version {found}, expected {expected}")]
    IncompatibleVersion { found: u32, expected: u32 },

    /// Retries were exhausted.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: RemoteError },

    /// A remote failure that is not retried.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The server broke the fetch protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The change handler refused a page.
    #[error("change handler error: {0}")]
    Handler(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Whether a later sync pass may succeed without intervention.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RetriesExhausted { .. } | Self::Suspended => true,
            Self::Remote(e) => e.is_retryable(),
            _ => false,
        }
    }
}
