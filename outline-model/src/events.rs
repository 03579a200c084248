//! Outline change notifications.
//!
//! Each outline owns an [`EventBus`]. Presentation code subscribes and
//! receives events in the order the outline published them.

use crate::shadow_table::ShadowTableChanges;
use outline_types::EntityId;
use tokio::sync::broadcast;
use tracing::trace;

const DEFAULT_CAPACITY: usize = 256;

/// Something observers may need to redraw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutlineEvent {
    /// Row content changed without altering the tree shape.
    DocumentChanged {
        document: EntityId,
        row_ids: Vec<String>,
    },
    /// The display list changed.
    StructuralChange {
        document: EntityId,
        changes: ShadowTableChanges,
    },
    TitleChanged {
        document: EntityId,
    },
    TagsChanged {
        document: EntityId,
    },
}

/// Broadcast channel for [`OutlineEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OutlineEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutlineEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: OutlineEvent) {
        if self.sender.send(event).is_err() {
            trace!("outline event dropped, no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
