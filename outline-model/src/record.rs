//! Conversion between the tree and remote records.
//!
//! Outbound, every entity builds a [`RemoteRecord`] from its current values
//! and the change tag of the server version it was last reconciled with.
//! Inbound, a server record is staged in the server shadows and merged field
//! by field; the same path handles fetched changes and rejected pushes.

use crate::container::ContainerId;
use crate::events::OutlineEvent;
use crate::outline::Outline;
use crate::row::{Image, Row};
use outline_types::{
    ChangeTag, EntityId, ImageRecord, OutlineRecord, RecordBody, RemoteRecord, RowRecord,
};
use tracing::{debug, info};

/// What a merge changed on a row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RowMerge {
    pub content_changed: bool,
    pub order_changed: bool,
}

/// What a merge changed on the outline itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct OutlineMerge {
    pub title_changed: bool,
    pub tags_changed: bool,
    pub order_changed: bool,
    pub links_added: Vec<EntityId>,
    pub links_removed: Vec<EntityId>,
}

/// How a delete rejected by the server was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteResolution {
    /// The server copy is the one we deleted; retry with its new tag.
    RetryDelete(ChangeTag),
    /// Someone edited the row meanwhile; the edit survives and the row is back.
    Restored,
    /// Nothing is known about a local delete of this entity.
    Unknown,
}

impl Row {
    /// Builds the outbound record from current values.
    #[must_use]
    pub fn build_record(&self) -> RemoteRecord {
        RemoteRecord {
            id: self.id.clone(),
            change_tag: self.cloud_metadata.clone(),
            body: RecordBody::Row(RowRecord {
                sync_id: self.sync_id.clone(),
                is_complete: *self.is_complete.get(),
                topic_data: self.topic.get().clone(),
                note_data: self.note.get().clone(),
                row_order: self.row_order.get().clone(),
                order: self.order.get().clone(),
            }),
        }
    }

    /// The record as the server last saw it: ancestors where a local edit is
    /// pending, current values elsewhere.
    pub(crate) fn known_server_record(&self) -> RemoteRecord {
        RemoteRecord {
            id: self.id.clone(),
            change_tag: self.cloud_metadata.clone(),
            body: RecordBody::Row(RowRecord {
                sync_id: self.sync_id.clone(),
                is_complete: *self.is_complete.ancestor().unwrap_or(self.is_complete.get()),
                topic_data: self.topic.ancestor().unwrap_or(self.topic.get()).clone(),
                note_data: self.note.ancestor().unwrap_or(self.note.get()).clone(),
                row_order: self.row_order.ancestor().unwrap_or(self.row_order.get()).clone(),
                order: self.order.ancestor().unwrap_or(self.order.get()).clone(),
            }),
        }
    }

    /// Materializes a row from a server record. `None` for other record types.
    #[must_use]
    pub fn from_record(record: &RemoteRecord) -> Option<Row> {
        let body = record.as_row()?;
        let mut row = Row::new(record.id.clone());
        row.merge_record(body, record.change_tag.as_ref());
        Some(row)
    }

    /// Stages `record` in the server shadows and merges every field.
    pub(crate) fn merge_record(&mut self, record: &RowRecord, tag: Option<&ChangeTag>) -> RowMerge {
        self.topic.set_server(record.topic_data.clone());
        self.note.set_server(record.note_data.clone());
        self.is_complete.set_server(record.is_complete);
        self.order.set_server(record.order.clone());
        self.row_order.set_server(record.row_order.clone());

        let mut content_changed = self.topic.resolve();
        content_changed |= self.note.resolve();
        content_changed |= self.is_complete.resolve();
        content_changed |= self.order.resolve();
        let order_changed = self.row_order.resolve_sequence();

        // A surviving local edit is still ours to push under our own sync id.
        if !self.has_shadows() {
            self.sync_id = record.sync_id.clone();
        }
        self.cloud_metadata = tag.cloned();
        RowMerge {
            content_changed,
            order_changed,
        }
    }

    /// Records a successful save of `saved`.
    pub(crate) fn rebase_on(&mut self, saved: &RowRecord, tag: Option<&ChangeTag>) {
        self.topic.rebase(saved.topic_data.clone());
        self.note.rebase(saved.note_data.clone());
        self.is_complete.rebase(saved.is_complete);
        self.order.rebase(saved.order.clone());
        self.row_order.rebase(saved.row_order.clone());
        self.cloud_metadata = tag.cloned();
    }
}

impl Image {
    #[must_use]
    pub fn build_record(&self) -> RemoteRecord {
        RemoteRecord {
            id: self.id.clone(),
            change_tag: self.cloud_metadata.clone(),
            body: RecordBody::Image(ImageRecord {
                sync_id: self.sync_id.clone(),
                is_in_notes: self.is_in_notes,
                offset: self.offset,
                asset: self.asset.clone(),
            }),
        }
    }

    #[must_use]
    pub fn from_record(record: &RemoteRecord) -> Option<Image> {
        let body = record.as_image()?;
        Some(Image {
            id: record.id.clone(),
            is_in_notes: body.is_in_notes,
            offset: body.offset,
            asset: body.asset.clone(),
            sync_id: body.sync_id.clone(),
            cloud_metadata: record.change_tag.clone(),
        })
    }
}

impl Outline {
    pub fn outline_record(&self) -> OutlineRecord {
        OutlineRecord {
            sync_id: self.sync_id.clone(),
            title: self.title.get().clone(),
            disambiguator: self.disambiguator,
            created: self.created,
            updated: self.updated,
            owner_name: self.owner_name.get().clone(),
            owner_email: self.owner_email.get().clone(),
            owner_url: self.owner_url.get().clone(),
            tag_names: self.tag_names.get().clone(),
            row_order: self.row_order.get().clone(),
            has_alt_links: self.has_alt_links,
            document_links: self.document_links.clone(),
            document_backlinks: self.document_backlinks.clone(),
        }
    }

    /// Builds the outbound record for any entity of this document.
    ///
    /// Returns `None` when the entity no longer exists locally, which the
    /// sync engine turns into a remote delete.
    pub fn build_record(&self, id: &EntityId) -> Option<RemoteRecord> {
        match id {
            EntityId::Document(..) if id == &self.id => Some(RemoteRecord {
                id: self.id.clone(),
                change_tag: self.cloud_metadata.clone(),
                body: RecordBody::Outline(self.outline_record()),
            }),
            EntityId::Row(..) => self.rows.get(id.row_uuid()?).map(Row::build_record),
            EntityId::Image(..) => self
                .rows
                .get(id.row_uuid()?)?
                .images
                .iter()
                .find(|image| &image.id == id)
                .map(Image::build_record),
            _ => None,
        }
    }

    /// The change tag of the server version a tombstoned row was deleted at.
    pub fn delete_change_tag(&self, id: &EntityId) -> Option<ChangeTag> {
        self.tombstones
            .get(id.row_uuid()?)
            .and_then(|t| t.record.change_tag.clone())
    }

    pub(crate) fn merge_outline_record(&mut self, record: &OutlineRecord, tag: Option<&ChangeTag>) -> OutlineMerge {
        self.title.set_server(record.title.clone());
        self.owner_name.set_server(record.owner_name.clone());
        self.owner_email.set_server(record.owner_email.clone());
        self.owner_url.set_server(record.owner_url.clone());
        self.tag_names.set_server(record.tag_names.clone());
        self.row_order.set_server(record.row_order.clone());

        let title_changed = self.title.resolve();
        self.owner_name.resolve();
        self.owner_email.resolve();
        self.owner_url.resolve();
        let tags_changed = self.tag_names.resolve_sequence();
        let order_changed = self.row_order.resolve_sequence();

        let links_added = record
            .document_links
            .iter()
            .filter(|l| !self.document_links.contains(l))
            .cloned()
            .collect();
        let links_removed = self
            .document_links
            .iter()
            .filter(|l| !record.document_links.contains(l))
            .cloned()
            .collect();

        self.document_links = record.document_links.clone();
        self.document_backlinks = record.document_backlinks.clone();
        self.disambiguator = record.disambiguator;
        self.has_alt_links = record.has_alt_links;
        self.created = record.created.or(self.created);
        self.updated = record.updated.or(self.updated);
        if !self.has_field_shadows() {
            self.sync_id = record.sync_id.clone();
        }
        self.cloud_metadata = tag.cloned();

        OutlineMerge {
            title_changed,
            tags_changed,
            order_changed,
            links_added,
            links_removed,
        }
    }

    pub(crate) fn has_field_shadows(&self) -> bool {
        self.title.has_shadows()
            || self.owner_name.has_shadows()
            || self.owner_email.has_shadows()
            || self.owner_url.has_shadows()
            || self.tag_names.has_shadows()
            || self.row_order.has_shadows()
    }

    /// Merges the server version of an entity whose push was rejected.
    ///
    /// After this the entity carries the server's change tag and the merged
    /// values, so rebuilding its record yields the retry. Returns `false`
    /// when the entity is gone locally.
    pub fn apply_conflict(&mut self, server: &RemoteRecord) -> bool {
        let tag = server.change_tag.as_ref();
        let structural = match (&server.id, &server.body) {
            (EntityId::Document(..), RecordBody::Outline(body)) if server.id == self.id => {
                let merge = self.merge_outline_record(body, tag);
                if merge.title_changed {
                    self.events.publish(OutlineEvent::TitleChanged {
                        document: self.id.clone(),
                    });
                }
                if merge.tags_changed {
                    self.events.publish(OutlineEvent::TagsChanged {
                        document: self.id.clone(),
                    });
                }
                merge.order_changed
            }
            (EntityId::Row(..), RecordBody::Row(body)) => {
                let Some(row) = server.id.row_uuid().and_then(|id| self.rows.get_mut(id)) else {
                    return false;
                };
                let merge = row.merge_record(body, tag);
                if merge.content_changed {
                    let row_id = row.uuid().to_string();
                    self.events.publish(OutlineEvent::DocumentChanged {
                        document: self.id.clone(),
                        row_ids: vec![row_id],
                    });
                }
                merge.order_changed
            }
            (EntityId::Image(..), RecordBody::Image(_)) => {
                let Some(image) = self.image_mut(&server.id) else {
                    return false;
                };
                image.cloud_metadata = tag.cloned();
                false
            }
            _ => return false,
        };
        debug!(document = %self.id, record = %server.id, "merged server version after conflict");

        if structural {
            self.rebuild_parents();
            self.refresh_shadow_table(&[]);
        }
        true
    }

    /// Records the server's acceptance of `saved`.
    pub fn update_sync_metadata(&mut self, saved: &RemoteRecord) {
        let tag = saved.change_tag.as_ref();
        match (&saved.id, &saved.body) {
            (EntityId::Document(..), RecordBody::Outline(body)) if saved.id == self.id => {
                self.title.rebase(body.title.clone());
                self.owner_name.rebase(body.owner_name.clone());
                self.owner_email.rebase(body.owner_email.clone());
                self.owner_url.rebase(body.owner_url.clone());
                self.tag_names.rebase(body.tag_names.clone());
                self.row_order.rebase(body.row_order.clone());
                self.cloud_metadata = tag.cloned();
            }
            (EntityId::Row(..), RecordBody::Row(body)) => {
                if let Some(row) = saved.id.row_uuid().and_then(|id| self.rows.get_mut(id)) {
                    row.rebase_on(body, tag);
                }
            }
            (EntityId::Image(..), RecordBody::Image(_)) => {
                if let Some(image) = self.image_mut(&saved.id) {
                    image.cloud_metadata = tag.cloned();
                }
            }
            _ => {}
        }
    }

    /// Settles a local delete that the server rejected because the row
    /// changed after we last saw it.
    pub fn resolve_delete_conflict(&mut self, server: &RemoteRecord) -> DeleteResolution {
        let Some(row_id) = server.id.row_uuid().filter(|_| server.id.image_uuid().is_none()) else {
            return DeleteResolution::Unknown;
        };
        let Some(tombstone) = self.tombstones.get_mut(row_id) else {
            return DeleteResolution::Unknown;
        };

        if server.same_content(&tombstone.record) {
            let Some(tag) = server.change_tag.clone() else {
                return DeleteResolution::Unknown;
            };
            tombstone.record.change_tag = Some(tag.clone());
            return DeleteResolution::RetryDelete(tag);
        }

        let Some(tombstone) = self.tombstones.remove(row_id) else {
            return DeleteResolution::Unknown;
        };
        let Some(row) = Row::from_record(server) else {
            return DeleteResolution::Unknown;
        };
        info!(document = %self.id, row = row_id, "remote edit beats local delete, restoring row");

        let parent = match &tombstone.parent {
            ContainerId::Row(id) if !self.rows.contains_key(id) => ContainerId::Root,
            other => other.clone(),
        };
        let row_id = row_id.to_string();
        self.begin_batch();
        let track = self.remote_backed;
        if let Some(order) = self.order_of_mut(&parent) {
            let at = tombstone.index.min(order.get().len());
            order.update(track, |o| o.insert(at, row_id.clone()));
        }
        self.rows.insert(row_id, row);
        self.touch_container(&parent);
        self.end_batch();

        self.rebuild_parents();
        self.refresh_shadow_table(&[]);
        DeleteResolution::Restored
    }

    /// Forgets everything learned from the remote store, as when the zone
    /// is gone and the document will be uploaded from scratch.
    pub fn clear_sync_data(&mut self) {
        self.cloud_metadata = None;
        self.title.clear_shadows();
        self.owner_name.clear_shadows();
        self.owner_email.clear_shadows();
        self.owner_url.clear_shadows();
        self.tag_names.clear_shadows();
        self.row_order.clear_shadows();
        self.tombstones.clear();
        for row in self.rows.values_mut() {
            row.clear_sync_data();
            row.cloud_metadata = None;
            for image in &mut row.images {
                image.cloud_metadata = None;
            }
        }
    }

    /// Every entity of this document, for a full upload.
    pub fn all_entity_ids(&self) -> Vec<EntityId> {
        let mut ids = vec![self.id.clone()];
        for row in self.rows.values() {
            ids.push(row.id.clone());
            ids.extend(row.images.iter().map(|image| image.id.clone()));
        }
        ids
    }

    pub(crate) fn image_mut(&mut self, id: &EntityId) -> Option<&mut Image> {
        self.rows
            .get_mut(id.row_uuid()?)?
            .images
            .iter_mut()
            .find(|image| &image.id == id)
    }
}
