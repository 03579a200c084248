//! Identifier types used throughout the outline engine.
//!
//! An [`EntityId`] names an account, a document, a row, or an image. The same
//! value is the local identity of the entity and the key of its remote record,
//! so the textual form is stable and round-trips through [`FromStr`].
//!
//! New document, row and image components use UUID v7 so that fresh ids sort
//! roughly by creation time.

use crate::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Account numbers are small integers assigned by the host application.
pub type AccountId = i64;

/// Composite key for every synchronizable entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityId {
    /// An account.
    Account(AccountId),
    /// A document (outline) inside an account.
    Document(AccountId, String),
    /// A row inside a document.
    Row(AccountId, String, String),
    /// An image attached to a row.
    Image(AccountId, String, String, String),
}

/// The kind of remote record an [`EntityId`] maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Outline,
    Row,
    Image,
}

impl EntityId {
    /// Creates a document id with a fresh time-ordered UUID.
    #[must_use]
    pub fn new_document(account: AccountId) -> Self {
        Self::Document(account, Uuid::now_v7().to_string())
    }

    /// Creates a row id inside `self`, which must name a document.
    ///
    /// Returns `None` when `self` is not a document id.
    #[must_use]
    pub fn new_row(&self) -> Option<Self> {
        match self {
            Self::Document(account, document) => Some(Self::Row(
                *account,
                document.clone(),
                Uuid::now_v7().to_string(),
            )),
            _ => None,
        }
    }

    /// Creates an image id attached to `self`, which must name a row.
    #[must_use]
    pub fn new_image(&self) -> Option<Self> {
        match self {
            Self::Row(account, document, row) => Some(Self::Image(
                *account,
                document.clone(),
                row.clone(),
                Uuid::now_v7().to_string(),
            )),
            _ => None,
        }
    }

    /// Builds the row id for `row_uuid` inside the document `self`.
    #[must_use]
    pub fn row(&self, row_uuid: &str) -> Option<Self> {
        match self {
            Self::Document(account, document) => {
                Some(Self::Row(*account, document.clone(), row_uuid.to_string()))
            }
            _ => None,
        }
    }

    /// The account every id belongs to.
    #[must_use]
    pub fn account_id(&self) -> AccountId {
        match self {
            Self::Account(account)
            | Self::Document(account, _)
            | Self::Row(account, _, _)
            | Self::Image(account, _, _, _) => *account,
        }
    }

    /// The document this id belongs to, or `None` for account ids.
    #[must_use]
    pub fn document_id(&self) -> Option<Self> {
        match self {
            Self::Account(_) => None,
            Self::Document(account, document)
            | Self::Row(account, document, _)
            | Self::Image(account, document, _, _) => {
                Some(Self::Document(*account, document.clone()))
            }
        }
    }

    /// The row this id belongs to (itself for row ids).
    #[must_use]
    pub fn row_id(&self) -> Option<Self> {
        match self {
            Self::Row(..) => Some(self.clone()),
            Self::Image(account, document, row, _) => {
                Some(Self::Row(*account, document.clone(), row.clone()))
            }
            _ => None,
        }
    }

    /// The document component.
    #[must_use]
    pub fn document_uuid(&self) -> Option<&str> {
        match self {
            Self::Account(_) => None,
            Self::Document(_, document) | Self::Row(_, document, _) | Self::Image(_, document, _, _) => {
                Some(document)
            }
        }
    }

    /// The row component.
    #[must_use]
    pub fn row_uuid(&self) -> Option<&str> {
        match self {
            Self::Row(_, _, row) | Self::Image(_, _, row, _) => Some(row),
            _ => None,
        }
    }

    /// The image component.
    #[must_use]
    pub fn image_uuid(&self) -> Option<&str> {
        match self {
            Self::Image(_, _, _, image) => Some(image),
            _ => None,
        }
    }

    /// The remote record type, `None` for accounts (they have no record).
    #[must_use]
    pub fn record_type(&self) -> Option<RecordType> {
        match self {
            Self::Account(_) => None,
            Self::Document(..) => Some(RecordType::Outline),
            Self::Row(..) => Some(RecordType::Row),
            Self::Image(..) => Some(RecordType::Image),
        }
    }

    /// Parses an entity id from its textual form.
    pub fn parse(s: &str) -> Result<Self, Error> {
        s.parse()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account(account) => write!(f, "account:{account}"),
            Self::Document(account, document) => write!(f, "document:{account}_{document}"),
            Self::Row(account, document, row) => write!(f, "row:{account}_{document}_{row}"),
            Self::Image(account, document, row, image) => {
                write!(f, "image:{account}_{document}_{row}_{image}")
            }
        }
    }
}

impl FromStr for EntityId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidEntityId(s.to_string());
        let (kind, rest) = s.split_once(':').ok_or_else(invalid)?;
        let parts: Vec<&str> = rest.split('_').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid());
        }
        let account: AccountId = parts[0].parse().map_err(|_| invalid())?;

        match (kind, parts.len()) {
            ("account", 1) => Ok(Self::Account(account)),
            ("document", 2) => Ok(Self::Document(account, parts[1].to_string())),
            ("row", 3) => Ok(Self::Row(account, parts[1].to_string(), parts[2].to_string())),
            ("image", 4) => Ok(Self::Image(
                account,
                parts[1].to_string(),
                parts[2].to_string(),
                parts[3].to_string(),
            )),
            _ => Err(invalid()),
        }
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Key under which a zone's change token is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChangeTokenKey {
    pub zone_name: String,
    pub owner_name: String,
}

impl ChangeTokenKey {
    #[must_use]
    pub fn new(zone_name: impl Into<String>, owner_name: impl Into<String>) -> Self {
        Self {
            zone_name: zone_name.into(),
            owner_name: owner_name.into(),
        }
    }
}

impl fmt::Display for ChangeTokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner_name, self.zone_name)
    }
}
