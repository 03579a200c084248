//! Outline document model.
//!
//! This crate owns the in-memory document:
//! - [`Outline`]: the aggregate, a flat row map whose structure lives in
//!   ordered child lists, with ancestor and server shadows on every synced
//!   field for three-way merge.
//! - [`ChangeApplier`]: folds fetched remote records into an outline.
//! - [`ShadowTable`]: the flattened display list and its minimal diff.
//! - [`EventBus`]: broadcast of [`OutlineEvent`]s to observers.
//!
//! Remote transport lives in `outline-sync`; this crate never performs I/O.

mod applier;
mod container;
mod error;
mod events;
mod integrity;
mod outline;
mod record;
mod row;
mod search;
mod shadow_table;
mod tracked;

pub use applier::{AppliedResult, ChangeApplier, TagRegistry};
pub use container::{ContainerId, RowContainer};
pub use error::{OutlineError, OutlineResult};
pub use events::{EventBus, OutlineEvent};
pub use integrity::CorruptionReport;
pub use outline::{Outline, PushRequestSink, Tombstone};
pub use record::DeleteResolution;
pub use row::{Image, Row};
pub use search::{SearchResultCoordinates, SearchState, ViewState};
pub use shadow_table::{Section, ShadowEntry, ShadowTable, ShadowTableChanges};
pub use tracked::Tracked;
