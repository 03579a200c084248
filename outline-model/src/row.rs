//! Rows and row images.

use crate::container::RowContainer;
use crate::tracked::Tracked;
use outline_types::{ChangeTag, EntityId};

/// An image embedded in a row's topic or note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub id: EntityId,
    pub is_in_notes: bool,
    pub offset: i64,
    pub asset: Vec<u8>,
    pub sync_id: Option<String>,
    pub cloud_metadata: Option<ChangeTag>,
}

impl Image {
    #[must_use]
    pub fn new(id: EntityId, is_in_notes: bool, offset: i64, asset: Vec<u8>) -> Self {
        Self {
            id,
            is_in_notes,
            offset,
            asset,
            sync_id: None,
            cloud_metadata: None,
        }
    }
}

/// A node in the outline.
///
/// Rows are owned by their [`Outline`](crate::Outline) and only change through
/// it, so that edits on a remote-backed document capture their ancestor
/// values and request a push.
#[derive(Debug, Clone)]
pub struct Row {
    pub(crate) id: EntityId,
    pub(crate) sync_id: Option<String>,
    pub(crate) cloud_metadata: Option<ChangeTag>,
    pub(crate) topic: Tracked<Option<Vec<u8>>>,
    pub(crate) note: Tracked<Option<Vec<u8>>>,
    pub(crate) is_complete: Tracked<bool>,
    pub(crate) row_order: Tracked<Vec<String>>,
    pub(crate) order: Tracked<Option<String>>,
    pub(crate) is_expanded: bool,
    pub(crate) images: Vec<Image>,
}

impl Row {
    /// Creates an empty, expanded row.
    #[must_use]
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            sync_id: None,
            cloud_metadata: None,
            topic: Tracked::default(),
            note: Tracked::default(),
            is_complete: Tracked::default(),
            row_order: Tracked::default(),
            order: Tracked::default(),
            is_expanded: true,
            images: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<Vec<u8>>) -> Self {
        self.topic = Tracked::new(Some(topic.into()));
        self
    }

    #[must_use]
    pub fn with_note(mut self, note: impl Into<Vec<u8>>) -> Self {
        self.note = Tracked::new(Some(note.into()));
        self
    }

    #[must_use]
    pub fn with_complete(mut self, is_complete: bool) -> Self {
        self.is_complete = Tracked::new(is_complete);
        self
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    /// The row component of the id, used as the key in row orders.
    pub fn uuid(&self) -> &str {
        self.id.row_uuid().unwrap_or_default()
    }

    pub fn topic(&self) -> Option<&[u8]> {
        self.topic.get().as_deref()
    }

    /// The topic as text, when it is valid UTF-8.
    pub fn topic_text(&self) -> Option<&str> {
        self.topic().and_then(|t| std::str::from_utf8(t).ok())
    }

    pub fn note(&self) -> Option<&[u8]> {
        self.note.get().as_deref()
    }

    pub fn note_text(&self) -> Option<&str> {
        self.note().and_then(|t| std::str::from_utf8(t).ok())
    }

    pub fn is_complete(&self) -> bool {
        *self.is_complete.get()
    }

    pub fn is_expanded(&self) -> bool {
        self.is_expanded
    }

    pub fn order(&self) -> Option<&str> {
        self.order.get().as_deref()
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn sync_id(&self) -> Option<&str> {
        self.sync_id.as_deref()
    }

    pub fn cloud_metadata(&self) -> Option<&ChangeTag> {
        self.cloud_metadata.as_ref()
    }

    /// Whether any field carries merge shadows.
    pub fn has_shadows(&self) -> bool {
        self.topic.has_shadows()
            || self.note.has_shadows()
            || self.is_complete.has_shadows()
            || self.row_order.has_shadows()
            || self.order.has_shadows()
    }

    pub fn clear_sync_data(&mut self) {
        self.topic.clear_shadows();
        self.note.clear_shadows();
        self.is_complete.clear_shadows();
        self.row_order.clear_shadows();
        self.order.clear_shadows();
    }

    pub(crate) fn row_order_mut(&mut self) -> &mut Tracked<Vec<String>> {
        &mut self.row_order
    }
}

impl RowContainer for Row {
    fn row_ids(&self) -> &[String] {
        self.row_order.get()
    }
}

/// Rows compare by content; merge shadows are ignored.
impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.sync_id == other.sync_id
            && self.cloud_metadata == other.cloud_metadata
            && self.topic.get() == other.topic.get()
            && self.note.get() == other.note.get()
            && self.is_complete.get() == other.is_complete.get()
            && self.row_order.get() == other.row_order.get()
            && self.order.get() == other.order.get()
            && self.is_expanded == other.is_expanded
            && self.images == other.images
    }
}

impl Eq for Row {}
