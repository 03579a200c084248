//! Ordering and merge primitives for outline sync.
//!
//! - [`FractionalIndex`]: lexicographically sortable position keys
//! - [`MergeScenario`], [`merge_value`], [`merge_sequence`]: field-level
//!   three-way conflict resolution
//! - [`SequenceDiff`]: ordered-set diff with move inference, shared by the
//!   sequence merge and the display-list reconciler
//!
//! Everything in this crate is a pure function of its inputs.

mod fractional_index;
mod merge;
mod sequence;

pub use fractional_index::{DEFAULT_REBALANCE_THRESHOLD, FractionalIndex};
pub use merge::{MergeScenario, merge_sequence, merge_value};
pub use sequence::{Move, SequenceDiff, dedupe};
