//! Application of fetched remote changes to an outline.

use crate::events::OutlineEvent;
use crate::outline::Outline;
use crate::row::{Image, Row};
use outline_types::{ChangeTag, EntityId, RecordBody, RecordType, RemoteRecord};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Registers tag names that arrive with an outline record.
pub trait TagRegistry: Send + Sync {
    fn create_tag(&self, name: &str);
}

/// What one call to [`ChangeApplier::apply`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedResult {
    /// Rows whose content, images or child list changed.
    pub changed_row_ids: BTreeSet<String>,
    /// Rows were created, deleted or re-parented.
    pub structural_change: bool,
    pub title_changed: bool,
    pub tags_changed: bool,
    pub linked_documents: Vec<EntityId>,
    pub unlinked_documents: Vec<EntityId>,
    /// The tree failed its integrity check after the changes landed.
    pub corrupted: bool,
}

impl AppliedResult {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed_row_ids.is_empty()
            && !self.structural_change
            && !self.title_changed
            && !self.tags_changed
            && self.linked_documents.is_empty()
            && self.unlinked_documents.is_empty()
    }
}

/// Merges remote records into an outline.
///
/// Records whose change tag matches the stored one were already applied and
/// are skipped, which makes applying the same batch twice a no-op. Records
/// carrying our own sync id are echoes of a push and only update the tag.
/// Merged child lists are sorted by their rows' ordering keys when every
/// row has one.
#[derive(Clone, Default)]
pub struct ChangeApplier {
    tags: Option<Arc<dyn TagRegistry>>,
}

impl std::fmt::Debug for ChangeApplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeApplier")
            .field("tags", &self.tags.is_some())
            .finish()
    }
}

fn already_applied(stored: Option<&ChangeTag>, incoming: Option<&ChangeTag>) -> bool {
    stored.is_some() && stored == incoming
}

fn is_echo(local: Option<&str>, incoming: Option<&str>) -> bool {
    local.is_some() && local == incoming
}

impl ChangeApplier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_tag_registry(mut self, tags: Arc<dyn TagRegistry>) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Applies one batch of upserts and deletes.
    ///
    /// The outline record goes first so that new root rows are already
    /// listed when their row records land; deletes run before saves.
    pub fn apply(&self, outline: &mut Outline, upserts: &[RemoteRecord], deletes: &[EntityId]) -> AppliedResult {
        let mut result = AppliedResult::default();
        let (outlines, rest): (Vec<&RemoteRecord>, Vec<&RemoteRecord>) = upserts
            .iter()
            .filter(|r| r.id.document_id().as_ref() == Some(outline.id()))
            .partition(|r| r.body.record_type() == RecordType::Outline);

        for record in outlines {
            self.apply_outline(outline, record, &mut result);
        }

        let deletes: Vec<&EntityId> = deletes
            .iter()
            .filter(|id| id.document_id().as_ref() == Some(outline.id()))
            .collect();

        for id in deletes.iter().filter(|id| id.record_type() == Some(RecordType::Row)) {
            if let Some(row_id) = id.row_uuid() {
                if outline.remove_remote_row(row_id) {
                    debug!(document = %outline.id(), row = row_id, "removed remotely deleted row");
                    result.changed_row_ids.remove(row_id);
                    result.structural_change = true;
                }
            }
        }

        for record in rest.iter().filter(|r| r.body.record_type() == RecordType::Row) {
            self.apply_row(outline, record, &mut result);
        }

        for id in deletes.iter().filter(|id| id.record_type() == Some(RecordType::Image)) {
            let Some(row_id) = id.row_uuid() else {
                continue;
            };
            if let Some(row) = outline.rows.get_mut(row_id) {
                let before = row.images.len();
                row.images.retain(|image| &image.id != *id);
                if row.images.len() != before {
                    result.changed_row_ids.insert(row_id.to_string());
                }
            }
        }

        for record in rest.iter().filter(|r| r.body.record_type() == RecordType::Image) {
            self.apply_image(outline, record, &mut result);
        }

        let touched = result.structural_change || !result.changed_row_ids.is_empty();
        if touched && outline.order_children_by_key() {
            result.structural_change = true;
        }

        if result.structural_change {
            outline.rebuild_parents();
            result.corrupted = outline.is_corrupted();
            if result.corrupted {
                warn!(document = %outline.id(), "outline inconsistent after remote changes");
            }
        }
        result
    }

    fn apply_outline(&self, outline: &mut Outline, record: &RemoteRecord, result: &mut AppliedResult) {
        let RecordBody::Outline(body) = &record.body else {
            return;
        };
        let tag = record.change_tag.as_ref();
        if already_applied(outline.cloud_metadata(), tag) {
            trace!(document = %outline.id(), "outline record already applied");
            return;
        }
        if is_echo(outline.sync_id(), body.sync_id.as_deref()) {
            outline.cloud_metadata = tag.cloned();
            return;
        }

        let merge = outline.merge_outline_record(body, tag);
        if let Some(tags) = &self.tags {
            for name in outline.tag_names() {
                tags.create_tag(name);
            }
        }
        result.title_changed |= merge.title_changed;
        result.tags_changed |= merge.tags_changed;
        result.structural_change |= merge.order_changed;
        result.linked_documents.extend(merge.links_added);
        result.unlinked_documents.extend(merge.links_removed);
    }

    fn apply_row(&self, outline: &mut Outline, record: &RemoteRecord, result: &mut AppliedResult) {
        let (Some(body), Some(row_id)) = (record.as_row(), record.id.row_uuid()) else {
            return;
        };
        // A pending local delete wins until the server rejects it.
        if outline.tombstone(row_id).is_some() {
            debug!(document = %outline.id(), row = row_id, "ignoring update to locally deleted row");
            return;
        }
        let tag = record.change_tag.as_ref();

        match outline.rows.get_mut(row_id) {
            Some(row) => {
                if already_applied(row.cloud_metadata(), tag) {
                    return;
                }
                if is_echo(row.sync_id(), body.sync_id.as_deref()) {
                    row.cloud_metadata = tag.cloned();
                    return;
                }
                let merge = row.merge_record(body, tag);
                if merge.content_changed || merge.order_changed {
                    result.changed_row_ids.insert(row_id.to_string());
                }
                result.structural_change |= merge.order_changed;
            }
            None => {
                let Some(row) = Row::from_record(record) else {
                    return;
                };
                outline.rows.insert(row_id.to_string(), row);
                result.changed_row_ids.insert(row_id.to_string());
                result.structural_change = true;
            }
        }
    }

    fn apply_image(&self, outline: &mut Outline, record: &RemoteRecord, result: &mut AppliedResult) {
        let (Some(image), Some(row_id)) = (Image::from_record(record), record.id.row_uuid()) else {
            return;
        };
        let Some(row) = outline.rows.get_mut(row_id) else {
            debug!(image = %record.id, "image for unknown row dropped");
            return;
        };
        if let Some(existing) = row.images.iter_mut().find(|i| i.id == image.id) {
            if already_applied(existing.cloud_metadata.as_ref(), image.cloud_metadata.as_ref()) {
                return;
            }
            *existing = image;
        } else {
            row.images.push(image);
        }
        row.images.sort_by_key(|i| (i.is_in_notes, i.offset));
        result.changed_row_ids.insert(row_id.to_string());
    }
}

impl Outline {
    /// Applies remote changes and publishes what they changed.
    ///
    /// Changed rows and their visible descendants are reloaded in the shadow
    /// table when one is loaded.
    pub fn apply_remote(&mut self, applier: &ChangeApplier, upserts: &[RemoteRecord], deletes: &[EntityId]) -> AppliedResult {
        let result = applier.apply(self, upserts, deletes);
        if result.is_empty() {
            return result;
        }

        if result.title_changed {
            self.events.publish(OutlineEvent::TitleChanged {
                document: self.id.clone(),
            });
        }
        if result.tags_changed {
            self.events.publish(OutlineEvent::TagsChanged {
                document: self.id.clone(),
            });
        }
        let changed: Vec<String> = result.changed_row_ids.iter().cloned().collect();
        if !changed.is_empty() {
            self.events.publish(OutlineEvent::DocumentChanged {
                document: self.id.clone(),
                row_ids: changed.clone(),
            });
        }
        self.refresh_shadow_table(&changed);
        result
    }
}
