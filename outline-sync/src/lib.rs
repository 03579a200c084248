//! Remote synchronization for outline documents.
//!
//! - [`ZoneClient`]: fetches and modifies one remote zone, with retries,
//!   request splitting, conflict settling and suspension.
//! - [`SyncManager`]: queues push requests from outlines, turns them into
//!   records, and routes fetched changes back into outlines.
//! - [`RemoteDatabase`]: the transport seam; [`mock::MemoryDatabase`] is an
//!   in-memory implementation for tests.

mod database;
mod error;
mod manager;
pub mod mock;
mod outcome;
mod requests;
mod retry;
mod token_store;
mod zone;

pub use database::{
    ChangePage, ChangeToken, ModifyRequest, ModifyResponse, RecordDelete, RemoteDatabase, SavePolicy,
    ZoneInfo,
};
pub use error::{RemoteError, SyncError, SyncResult};
pub use manager::{DocumentStore, FetchReport, SendReport, SharedOutline, SyncConfig, SyncManager};
pub use outcome::ZoneOutcome;
pub use requests::{PushRequest, RequestQueue};
pub use retry::RetryPolicy;
pub use token_store::{ChangeTokenStore, FileTokenStore, MemoryTokenStore};
pub use zone::{
    FetchSummary, ModifyFailure, ModifyOutcome, RecordSource, ZoneChangeHandler, ZoneClient,
    DEFAULT_CHUNK_SIZE, ZONE_VERSION,
};
