//! Remote record database abstraction.
//!
//! A database holds zones; a zone holds records keyed by [`EntityId`] and
//! hands out change tokens that let a client fetch only what changed since
//! its last fetch.

use crate::error::RemoteError;
use async_trait::async_trait;
use outline_types::{ChangeTag, ChangeTokenKey, EntityId, RemoteRecord};
use serde::{Deserialize, Serialize};

/// Opaque cursor into a zone's change history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeToken(pub Vec<u8>);

/// One page of zone changes.
#[derive(Debug, Clone, Default)]
pub struct ChangePage {
    pub updated: Vec<RemoteRecord>,
    pub deleted: Vec<EntityId>,
    /// Token to pass to the next fetch.
    pub token: Option<ChangeToken>,
    /// More pages follow.
    pub more_coming: bool,
}

/// When a save overwrites the server copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SavePolicy {
    /// Reject the save unless the record's change tag matches the server's.
    #[default]
    IfServerUnchanged,
    /// Overwrite unconditionally.
    AllKeys,
}

/// A delete carrying the change tag the client last saw.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDelete {
    pub id: EntityId,
    pub expected_tag: Option<ChangeTag>,
}

impl RecordDelete {
    #[must_use]
    pub fn new(id: EntityId, expected_tag: Option<ChangeTag>) -> Self {
        Self { id, expected_tag }
    }
}

/// An atomic batch of saves and deletes.
#[derive(Debug, Clone, Default)]
pub struct ModifyRequest {
    pub saves: Vec<RemoteRecord>,
    pub deletes: Vec<RecordDelete>,
    pub policy: SavePolicy,
}

impl ModifyRequest {
    #[must_use]
    pub fn len(&self) -> usize {
        self.saves.len() + self.deletes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.saves.is_empty() && self.deletes.is_empty()
    }
}

/// What the server committed.
#[derive(Debug, Clone, Default)]
pub struct ModifyResponse {
    /// Saved records carrying their new change tags.
    pub saved: Vec<RemoteRecord>,
    pub deleted: Vec<EntityId>,
}

/// Zone metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneInfo {
    /// Schema version the zone was created with.
    pub version: u32,
}

/// Abstract remote database.
///
/// `modify_records` is atomic: when any record fails the call returns
/// [`RemoteError::PartialFailure`] and nothing is committed.
#[async_trait]
pub trait RemoteDatabase: Send + Sync {
    /// Changes since `token`, or the whole zone when `token` is `None`.
    async fn fetch_zone_changes(
        &self,
        zone: &ChangeTokenKey,
        token: Option<&ChangeToken>,
    ) -> Result<ChangePage, RemoteError>;

    async fn modify_records(
        &self,
        zone: &ChangeTokenKey,
        request: ModifyRequest,
    ) -> Result<ModifyResponse, RemoteError>;

    async fn fetch_record(
        &self,
        zone: &ChangeTokenKey,
        id: &EntityId,
    ) -> Result<Option<RemoteRecord>, RemoteError>;

    /// `None` when the zone does not exist.
    async fn zone_info(&self, zone: &ChangeTokenKey) -> Result<Option<ZoneInfo>, RemoteError>;

    /// Creating an existing zone succeeds and leaves it untouched.
    async fn create_zone(&self, zone: &ChangeTokenKey, info: ZoneInfo) -> Result<(), RemoteError>;

    async fn delete_zone(&self, zone: &ChangeTokenKey) -> Result<(), RemoteError>;
}
