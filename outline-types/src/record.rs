//! Remote record shapes.
//!
//! A [`RemoteRecord`] is what the remote store keeps per entity: the key, an
//! opaque change tag issued by the server, and a typed body per record type.

use crate::ids::{EntityId, RecordType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-issued fingerprint of a record version.
///
/// Two records with the same change tag are the same server version, which is
/// how no-op pushes and already-applied fetches are detected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeTag(pub String);

impl ChangeTag {
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Outline (document) fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutlineRecord {
    pub sync_id: Option<String>,
    pub title: Option<String>,
    pub disambiguator: Option<i64>,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub owner_name: Option<String>,
    pub owner_email: Option<String>,
    pub owner_url: Option<String>,
    pub tag_names: Vec<String>,
    /// Root row order, carried for older clients that order by id lists.
    pub row_order: Vec<String>,
    pub has_alt_links: Option<bool>,
    pub document_links: Vec<EntityId>,
    pub document_backlinks: Vec<EntityId>,
}

/// Row fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowRecord {
    pub sync_id: Option<String>,
    pub is_complete: bool,
    pub topic_data: Option<Vec<u8>>,
    pub note_data: Option<Vec<u8>>,
    pub row_order: Vec<String>,
    /// Ordering key within the parent scope.
    pub order: Option<String>,
}

/// Image fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub sync_id: Option<String>,
    pub is_in_notes: bool,
    pub offset: i64,
    pub asset: Vec<u8>,
}

/// Typed record payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordBody {
    Outline(OutlineRecord),
    Row(RowRecord),
    Image(ImageRecord),
}

impl RecordBody {
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Outline(_) => RecordType::Outline,
            Self::Row(_) => RecordType::Row,
            Self::Image(_) => RecordType::Image,
        }
    }

    /// The sync id stamped by the device that last wrote the record.
    #[must_use]
    pub fn sync_id(&self) -> Option<&str> {
        match self {
            Self::Outline(r) => r.sync_id.as_deref(),
            Self::Row(r) => r.sync_id.as_deref(),
            Self::Image(r) => r.sync_id.as_deref(),
        }
    }
}

/// One record in a remote zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: EntityId,
    /// `None` until the server has accepted the record once.
    pub change_tag: Option<ChangeTag>,
    pub body: RecordBody,
}

impl RemoteRecord {
    #[must_use]
    pub fn new(id: EntityId, body: RecordBody) -> Self {
        Self {
            id,
            change_tag: None,
            body,
        }
    }

    #[must_use]
    pub fn with_change_tag(mut self, tag: ChangeTag) -> Self {
        self.change_tag = Some(tag);
        self
    }

    #[must_use]
    pub fn as_row(&self) -> Option<&RowRecord> {
        match &self.body {
            RecordBody::Row(r) => Some(r),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_outline(&self) -> Option<&OutlineRecord> {
        match &self.body {
            RecordBody::Outline(r) => Some(r),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_image(&self) -> Option<&ImageRecord> {
        match &self.body {
            RecordBody::Image(r) => Some(r),
            _ => None,
        }
    }

    /// Whether `self` and `other` carry the same field values, ignoring
    /// server bookkeeping and the writer's sync id.
    #[must_use]
    pub fn same_content(&self, other: &RemoteRecord) -> bool {
        match (&self.body, &other.body) {
            (RecordBody::Row(a), RecordBody::Row(b)) => {
                RowRecord { sync_id: None, ..a.clone() } == RowRecord { sync_id: None, ..b.clone() }
            }
            (RecordBody::Outline(a), RecordBody::Outline(b)) => {
                OutlineRecord { sync_id: None, ..a.clone() }
                    == OutlineRecord { sync_id: None, ..b.clone() }
            }
            (RecordBody::Image(a), RecordBody::Image(b)) => {
                ImageRecord { sync_id: None, ..a.clone() } == ImageRecord { sync_id: None, ..b.clone() }
            }
            _ => false,
        }
    }
}
