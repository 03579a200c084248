//! The outline aggregate.
//!
//! An [`Outline`] owns every row of a document in a flat `id → Row` map.
//! Parent/child structure lives only in the ordered child lists (`row_order`)
//! of the root and of each row; the parent map is derived from those lists
//! and rebuilt after structural changes.
//!
//! On a remote-backed outline every local edit:
//! - snapshots the ancestor value of each tracked field it touches, once per
//!   sync round,
//! - stamps a fresh sync id on the touched entity,
//! - asks the injected [`PushRequestSink`] to push the touched entities.
//!
//! Requests are grouped per batch. Each public mutation is its own batch;
//! callers wrap several mutations in [`Outline::begin_batch`] /
//! [`Outline::end_batch`] to send them as one request set.

use crate::container::{ContainerId, RowContainer};
use crate::error::{OutlineError, OutlineResult};
use crate::events::{EventBus, OutlineEvent};
use crate::row::{Image, Row};
use crate::search::ViewState;
use crate::shadow_table::ShadowTable;
use crate::tracked::Tracked;
use chrono::{DateTime, Utc};
use outline_crdt::{DEFAULT_REBALANCE_THRESHOLD, FractionalIndex};
use outline_types::{ChangeTag, EntityId, RemoteRecord};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Receives the entities a finished batch wants pushed to the remote store.
pub trait PushRequestSink: Send + Sync {
    fn request_push(&self, ids: BTreeSet<EntityId>);
}

/// A locally deleted row, kept until the remote delete is confirmed.
#[derive(Debug, Clone, PartialEq)]
pub struct Tombstone {
    /// The row as the server last knew it.
    pub record: RemoteRecord,
    pub parent: ContainerId,
    pub index: usize,
}

#[derive(Debug, Default)]
struct Batch {
    depth: usize,
    pending: BTreeSet<EntityId>,
}

pub struct Outline {
    pub(crate) id: EntityId,
    pub(crate) remote_backed: bool,
    pub(crate) sync_id: Option<String>,
    pub(crate) cloud_metadata: Option<ChangeTag>,
    pub(crate) title: Tracked<Option<String>>,
    pub(crate) owner_name: Tracked<Option<String>>,
    pub(crate) owner_email: Tracked<Option<String>>,
    pub(crate) owner_url: Tracked<Option<String>>,
    pub(crate) tag_names: Tracked<Vec<String>>,
    pub(crate) disambiguator: Option<i64>,
    pub(crate) created: Option<DateTime<Utc>>,
    pub(crate) updated: Option<DateTime<Utc>>,
    pub(crate) has_alt_links: Option<bool>,
    pub(crate) document_links: Vec<EntityId>,
    pub(crate) document_backlinks: Vec<EntityId>,
    pub(crate) row_order: Tracked<Vec<String>>,
    pub(crate) rows: HashMap<String, Row>,
    pub(crate) parents: HashMap<String, ContainerId>,
    pub(crate) tombstones: HashMap<String, Tombstone>,
    pub(crate) view: ViewState,
    pub(crate) shadow_table: Option<ShadowTable>,
    pub(crate) events: EventBus,
    batch: Batch,
    sink: Option<Arc<dyn PushRequestSink>>,
    rebalance_threshold: usize,
}

impl fmt::Debug for Outline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outline")
            .field("id", &self.id)
            .field("remote_backed", &self.remote_backed)
            .field("title", self.title.get())
            .field("rows", &self.rows.len())
            .field("batch_depth", &self.batch.depth)
            .finish_non_exhaustive()
    }
}

impl Outline {
    /// Creates an empty local outline. `id` should be a document id.
    #[must_use]
    pub fn new(id: EntityId) -> Self {
        let now = Utc::now();
        Self {
            id,
            remote_backed: false,
            sync_id: None,
            cloud_metadata: None,
            title: Tracked::default(),
            owner_name: Tracked::default(),
            owner_email: Tracked::default(),
            owner_url: Tracked::default(),
            tag_names: Tracked::default(),
            disambiguator: None,
            created: Some(now),
            updated: Some(now),
            has_alt_links: None,
            document_links: Vec::new(),
            document_backlinks: Vec::new(),
            row_order: Tracked::default(),
            rows: HashMap::new(),
            parents: HashMap::new(),
            tombstones: HashMap::new(),
            view: ViewState::default(),
            shadow_table: None,
            events: EventBus::default(),
            batch: Batch::default(),
            sink: None,
            rebalance_threshold: DEFAULT_REBALANCE_THRESHOLD,
        }
    }

    /// Marks the outline as synced through a remote zone.
    #[must_use]
    pub fn with_remote(mut self, remote_backed: bool) -> Self {
        self.remote_backed = remote_backed;
        self
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Tracked::new(Some(title.into()));
        self
    }

    #[must_use]
    pub fn with_rebalance_threshold(mut self, threshold: usize) -> Self {
        self.rebalance_threshold = threshold.max(1);
        self
    }

    /// Connects the outline to the sync engine and flushes anything that was
    /// queued before it was attached.
    pub fn attach_sink(&mut self, sink: Arc<dyn PushRequestSink>) {
        self.sink = Some(sink);
        if self.batch.depth == 0 {
            self.flush_requests();
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<OutlineEvent> {
        self.events.subscribe()
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn is_remote_backed(&self) -> bool {
        self.remote_backed
    }

    pub fn title(&self) -> Option<&str> {
        self.title.get().as_deref()
    }

    pub fn owner_name(&self) -> Option<&str> {
        self.owner_name.get().as_deref()
    }

    pub fn owner_email(&self) -> Option<&str> {
        self.owner_email.get().as_deref()
    }

    pub fn owner_url(&self) -> Option<&str> {
        self.owner_url.get().as_deref()
    }

    pub fn tag_names(&self) -> &[String] {
        self.tag_names.get()
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.created
    }

    pub fn updated(&self) -> Option<DateTime<Utc>> {
        self.updated
    }

    pub fn document_links(&self) -> &[EntityId] {
        &self.document_links
    }

    pub fn document_backlinks(&self) -> &[EntityId] {
        &self.document_backlinks
    }

    pub fn sync_id(&self) -> Option<&str> {
        self.sync_id.as_deref()
    }

    pub fn cloud_metadata(&self) -> Option<&ChangeTag> {
        self.cloud_metadata.as_ref()
    }

    /// Whether the outline or any row carries merge shadows.
    pub fn has_shadows(&self) -> bool {
        self.has_field_shadows() || self.rows.values().any(Row::has_shadows)
    }

    pub fn row(&self, row_id: &str) -> Option<&Row> {
        self.rows.get(row_id)
    }

    /// Every row in the flat index, in no particular order.
    pub fn all_rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.values()
    }

    pub fn row_total(&self) -> usize {
        self.rows.len()
    }

    /// Children of `container` in order. Dangling ids are skipped.
    pub fn rows_in(&self, container: &ContainerId) -> Vec<&Row> {
        self.order_of(container)
            .map(|order| order.get().iter().filter_map(|id| self.rows.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn container(&self, container: &ContainerId) -> Option<&dyn RowContainer> {
        match container {
            ContainerId::Root => Some(self as &dyn RowContainer),
            ContainerId::Row(id) => self.rows.get(id).map(|row| row as &dyn RowContainer),
        }
    }

    pub fn first_index(&self, container: &ContainerId, row_id: &str) -> Option<usize> {
        self.container(container).and_then(|c| c.first_index(row_id))
    }

    pub fn tombstone(&self, row_id: &str) -> Option<&Tombstone> {
        self.tombstones.get(row_id)
    }

    /// A fresh row whose id belongs to this document.
    #[must_use]
    pub fn new_row(&self) -> Row {
        Row::new(self.row_entity(&Uuid::now_v7().to_string()))
    }

    pub(crate) fn row_entity(&self, row_id: &str) -> EntityId {
        EntityId::Row(
            self.id.account_id(),
            self.id.document_uuid().unwrap_or_default().to_string(),
            row_id.to_string(),
        )
    }

    // ── Derived structure ────────────────────────────────────────

    pub fn parent_of(&self, row_id: &str) -> Option<&ContainerId> {
        self.parents.get(row_id)
    }

    /// Row ids from the parent of `row_id` up to the top level.
    pub fn ancestors(&self, row_id: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = self.parents.get(row_id);
        while let Some(ContainerId::Row(parent)) = cursor {
            if !seen.insert(parent.as_str()) {
                break;
            }
            out.push(parent.clone());
            cursor = self.parents.get(parent);
        }
        out
    }

    /// Depth of a row, zero for top-level rows.
    pub fn level(&self, row_id: &str) -> usize {
        self.ancestors(row_id).len()
    }

    /// All rows below `row_id`, depth first.
    pub fn descendants(&self, row_id: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut seen: HashSet<&str> = HashSet::from([row_id]);
        let mut stack: Vec<&str> = self
            .rows
            .get(row_id)
            .map(|r| r.row_ids().iter().rev().map(String::as_str).collect())
            .unwrap_or_default();

        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let Some(row) = self.rows.get(id) else {
                continue;
            };
            out.push(id.to_string());
            stack.extend(row.row_ids().iter().rev().map(String::as_str));
        }
        out
    }

    pub fn is_any_parent_complete(&self, row_id: &str) -> bool {
        self.ancestors(row_id)
            .iter()
            .any(|id| self.rows.get(id).is_some_and(Row::is_complete))
    }

    /// Rebuilds the parent map from the child lists. First reference wins.
    pub(crate) fn rebuild_parents(&mut self) {
        let mut parents = HashMap::with_capacity(self.rows.len());
        let mut stack: Vec<(ContainerId, &String)> = self
            .row_order
            .get()
            .iter()
            .rev()
            .map(|id| (ContainerId::Root, id))
            .collect();

        while let Some((parent, id)) = stack.pop() {
            if parents.contains_key(id) {
                continue;
            }
            let Some(row) = self.rows.get(id) else {
                continue;
            };
            parents.insert(id.clone(), parent);
            let me = ContainerId::Row(id.clone());
            stack.extend(row.row_ids().iter().rev().map(|child| (me.clone(), child)));
        }

        // Rows outside the root tree still report the row listing them.
        for (id, row) in &self.rows {
            for child in row.row_ids() {
                parents
                    .entry(child.clone())
                    .or_insert_with(|| ContainerId::Row(id.clone()));
            }
        }
        self.parents = parents;
    }

    pub(crate) fn order_of(&self, container: &ContainerId) -> Option<&Tracked<Vec<String>>> {
        match container {
            ContainerId::Root => Some(&self.row_order),
            ContainerId::Row(id) => self.rows.get(id).map(|row| &row.row_order),
        }
    }

    pub(crate) fn order_of_mut(&mut self, container: &ContainerId) -> Option<&mut Tracked<Vec<String>>> {
        match container {
            ContainerId::Root => Some(&mut self.row_order),
            ContainerId::Row(id) => self.rows.get_mut(id).map(Row::row_order_mut),
        }
    }

    /// Every container whose child list mentions `row_id`.
    pub(crate) fn containers_listing(&self, row_id: &str) -> Vec<ContainerId> {
        let mut out = Vec::new();
        if self.row_order.get().iter().any(|id| id == row_id) {
            out.push(ContainerId::Root);
        }
        for (id, row) in &self.rows {
            if row.contains_row(row_id) {
                out.push(ContainerId::Row(id.clone()));
            }
        }
        out
    }

    // ── Batching and push requests ───────────────────────────────

    pub fn begin_batch(&mut self) {
        self.batch.depth += 1;
    }

    pub fn end_batch(&mut self) {
        match self.batch.depth {
            0 => warn!(document = %self.id, "end_batch without begin_batch"),
            1 => {
                self.batch.depth = 0;
                self.flush_requests();
            }
            _ => self.batch.depth -= 1,
        }
    }

    pub fn batch_depth(&self) -> usize {
        self.batch.depth
    }

    /// Entities collected by the open batch, or waiting for a sink.
    pub fn pending_requests(&self) -> &BTreeSet<EntityId> {
        &self.batch.pending
    }

    pub(crate) fn request_push(&mut self, id: EntityId) {
        if !self.remote_backed {
            return;
        }
        self.batch.pending.insert(id);
        if self.batch.depth == 0 {
            self.flush_requests();
        }
    }

    fn flush_requests(&mut self) {
        if self.batch.pending.is_empty() {
            return;
        }
        let Some(sink) = self.sink.as_ref() else {
            return;
        };
        let ids = std::mem::take(&mut self.batch.pending);
        debug!(document = %self.id, count = ids.len(), "requesting push");
        sink.request_push(ids);
    }

    pub(crate) fn touch_outline(&mut self) {
        if !self.remote_backed {
            return;
        }
        self.sync_id = Some(Uuid::now_v7().to_string());
        self.updated = Some(Utc::now());
        self.request_push(self.id.clone());
    }

    pub(crate) fn touch_row(&mut self, row_id: &str) {
        if !self.remote_backed {
            return;
        }
        let Some(row) = self.rows.get_mut(row_id) else {
            return;
        };
        row.sync_id = Some(Uuid::now_v7().to_string());
        let id = row.id.clone();
        self.request_push(id);
    }

    pub(crate) fn touch_container(&mut self, container: &ContainerId) {
        match container {
            ContainerId::Root => self.touch_outline(),
            ContainerId::Row(id) => self.touch_row(id),
        }
    }

    // ── Structural mutations ─────────────────────────────────────

    /// Inserts `row` into `parent` at `index` (clamped to the end).
    pub fn insert_row(&mut self, row: Row, parent: &ContainerId, index: usize) -> OutlineResult<()> {
        self.check_row_entity(&row.id)?;
        let row_id = row.uuid().to_string();
        if self.rows.contains_key(&row_id) {
            return Err(OutlineError::DuplicateRow(row_id));
        }
        self.check_container(parent)?;

        self.begin_batch();
        let track = self.remote_backed;
        let at = self.insert_into_order(parent, &row_id, index, track);
        self.rows.insert(row_id.clone(), row);
        self.parents.insert(row_id.clone(), parent.clone());
        self.tombstones.remove(&row_id);
        self.assign_order_key(parent, at);
        self.touch_container(parent);
        self.touch_row(&row_id);
        self.end_batch();

        self.refresh_shadow_table(&[]);
        Ok(())
    }

    pub fn append_row(&mut self, row: Row, parent: &ContainerId) -> OutlineResult<()> {
        self.insert_row(row, parent, usize::MAX)
    }

    /// Removes a row and its subtree. Returns the removed row ids.
    pub fn remove_row(&mut self, row_id: &str) -> OutlineResult<Vec<String>> {
        if !self.rows.contains_key(row_id) {
            return Err(OutlineError::RowNotFound(row_id.to_string()));
        }

        let mut removed = vec![row_id.to_string()];
        removed.extend(self.descendants(row_id));

        let placements: Vec<(ContainerId, usize)> = removed
            .iter()
            .map(|id| {
                let parent = self.parents.get(id).cloned().unwrap_or(ContainerId::Root);
                let index = self.first_index(&parent, id).unwrap_or(0);
                (parent, index)
            })
            .collect();

        self.begin_batch();
        let track = self.remote_backed;
        for container in self.containers_listing(row_id) {
            if let Some(order) = self.order_of_mut(&container) {
                order.update(track, |o| o.retain(|id| id != row_id));
            }
            self.touch_container(&container);
        }

        for (id, (parent, index)) in removed.iter().zip(placements) {
            let Some(row) = self.rows.remove(id) else {
                continue;
            };
            self.parents.remove(id);
            if self.remote_backed {
                self.tombstones.insert(
                    id.clone(),
                    Tombstone {
                        record: row.known_server_record(),
                        parent,
                        index,
                    },
                );
            }
            self.request_push(row.id.clone());
        }
        self.end_batch();

        self.refresh_shadow_table(&[]);
        Ok(removed)
    }

    /// Moves a row under `new_parent` at `index` (position after removal).
    pub fn move_row(&mut self, row_id: &str, new_parent: &ContainerId, index: usize) -> OutlineResult<()> {
        if !self.rows.contains_key(row_id) {
            return Err(OutlineError::RowNotFound(row_id.to_string()));
        }
        self.check_container(new_parent)?;
        if let ContainerId::Row(parent) = new_parent {
            if parent == row_id || self.descendants(row_id).iter().any(|d| d == parent) {
                return Err(OutlineError::CyclicMove {
                    row: row_id.to_string(),
                    parent: parent.clone(),
                });
            }
        }

        self.begin_batch();
        let track = self.remote_backed;
        let old_parent = self.parents.get(row_id).cloned().unwrap_or(ContainerId::Root);
        if let Some(order) = self.order_of_mut(&old_parent) {
            order.update(track, |o| o.retain(|id| id != row_id));
        }
        self.touch_container(&old_parent);

        let at = self.insert_into_order(new_parent, row_id, index, track);
        self.parents.insert(row_id.to_string(), new_parent.clone());
        self.assign_order_key(new_parent, at);
        self.touch_container(new_parent);
        self.touch_row(row_id);
        self.end_batch();

        self.refresh_shadow_table(&[]);
        Ok(())
    }

    fn insert_into_order(&mut self, container: &ContainerId, row_id: &str, index: usize, track: bool) -> usize {
        let Some(order) = self.order_of_mut(container) else {
            return 0;
        };
        let at = index.min(order.get().len());
        order.update(track, |o| o.insert(at, row_id.to_string()));
        at
    }

    fn check_container(&self, container: &ContainerId) -> OutlineResult<()> {
        match container {
            ContainerId::Root => Ok(()),
            ContainerId::Row(id) if self.rows.contains_key(id) => Ok(()),
            ContainerId::Row(id) => Err(OutlineError::RowNotFound(id.clone())),
        }
    }

    fn check_row_entity(&self, id: &EntityId) -> OutlineResult<()> {
        let same_document = id.document_id().as_ref() == Some(&self.id);
        if same_document && id.row_uuid().is_some() && id.image_uuid().is_none() {
            Ok(())
        } else {
            Err(OutlineError::ForeignEntity(id.clone()))
        }
    }

    // ── Ordering keys ────────────────────────────────────────────

    /// Gives the row at `at` a key between its neighbours, respacing the
    /// whole sibling list when the neighbours have no usable keys or the new
    /// key grew too long.
    pub(crate) fn assign_order_key(&mut self, container: &ContainerId, at: usize) {
        let ids: Vec<String> = self
            .order_of(container)
            .map(|o| o.get().clone())
            .unwrap_or_default();
        let Some(target) = ids.get(at).cloned() else {
            return;
        };
        let key_at = |i: usize| -> Option<String> {
            ids.get(i)
                .and_then(|id| self.rows.get(id))
                .and_then(|row| row.order().map(str::to_owned))
        };

        let prev = at.checked_sub(1).and_then(key_at);
        let next = key_at(at + 1);
        let usable = (at == 0 || prev.is_some())
            && (at + 1 >= ids.len() || next.is_some())
            && match (&prev, &next) {
                (Some(p), Some(n)) => p < n,
                _ => true,
            };

        if usable {
            let key = FractionalIndex::between(prev.as_deref(), next.as_deref());
            if !FractionalIndex::needs_rebalancing(&key, self.rebalance_threshold) {
                let track = self.remote_backed;
                if let Some(row) = self.rows.get_mut(&target) {
                    row.order.set(Some(key), track);
                }
                return;
            }
        }
        self.rebalance_container(container, &ids);
    }

    /// Sorts every child list whose rows all carry ordering keys by those
    /// keys. Equal keys keep their list order. Returns whether a list moved.
    ///
    /// Local edits keep lists sorted, so this only reorders lists merged
    /// from remote records.
    pub(crate) fn order_children_by_key(&mut self) -> bool {
        let containers: Vec<ContainerId> = std::iter::once(ContainerId::Root)
            .chain(self.rows.keys().map(|id| ContainerId::row(id.clone())))
            .collect();

        let mut changed = false;
        for container in containers {
            let Some(ids) = self.order_of(&container).map(|o| o.get().clone()) else {
                continue;
            };
            if ids.len() < 2 {
                continue;
            }
            let keyed: Option<Vec<(String, String)>> = ids
                .iter()
                .map(|id| {
                    let key = self.rows.get(id)?.order()?;
                    Some((key.to_owned(), id.clone()))
                })
                .collect();
            let Some(mut keyed) = keyed else {
                continue;
            };
            keyed.sort_by(|a, b| a.0.cmp(&b.0));
            let sorted: Vec<String> = keyed.into_iter().map(|(_, id)| id).collect();
            if sorted != ids {
                debug!(document = %self.id, %container, "reordered children by ordering key");
                if let Some(order) = self.order_of_mut(&container) {
                    order.set(sorted, false);
                }
                changed = true;
            }
        }
        changed
    }

    fn rebalance_container(&mut self, container: &ContainerId, ids: &[String]) {
        debug!(document = %self.id, %container, count = ids.len(), "respacing ordering keys");
        let track = self.remote_backed;
        let keys = FractionalIndex::rebalance(ids.len());
        for (id, key) in ids.iter().zip(keys) {
            let changed = self
                .rows
                .get_mut(id)
                .is_some_and(|row| row.order.set(Some(key), track));
            if changed {
                self.touch_row(id);
            }
        }
    }

    // ── Field mutations ──────────────────────────────────────────

    pub fn update_topic(&mut self, row_id: &str, topic: Option<Vec<u8>>) -> OutlineResult<()> {
        self.edit_row(row_id, |row, track| row.topic.set(topic, track))
    }

    pub fn update_note(&mut self, row_id: &str, note: Option<Vec<u8>>) -> OutlineResult<()> {
        self.edit_row(row_id, |row, track| row.note.set(note, track))
    }

    pub fn complete(&mut self, row_id: &str) -> OutlineResult<()> {
        self.set_complete(row_id, true)
    }

    pub fn uncomplete(&mut self, row_id: &str) -> OutlineResult<()> {
        self.set_complete(row_id, false)
    }

    fn set_complete(&mut self, row_id: &str, is_complete: bool) -> OutlineResult<()> {
        self.edit_row(row_id, |row, track| row.is_complete.set(is_complete, track))?;
        if self.view.completed_filter {
            self.refresh_shadow_table(&[row_id.to_string()]);
        }
        Ok(())
    }

    fn edit_row(&mut self, row_id: &str, edit: impl FnOnce(&mut Row, bool) -> bool) -> OutlineResult<()> {
        let track = self.remote_backed;
        let row = self
            .rows
            .get_mut(row_id)
            .ok_or_else(|| OutlineError::RowNotFound(row_id.to_string()))?;
        if edit(row, track) {
            self.touch_row(row_id);
            self.events.publish(OutlineEvent::DocumentChanged {
                document: self.id.clone(),
                row_ids: vec![row_id.to_string()],
            });
        }
        Ok(())
    }

    pub fn update_title(&mut self, title: Option<String>) {
        let track = self.remote_backed;
        if self.title.set(title, track) {
            self.touch_outline();
            self.events.publish(OutlineEvent::TitleChanged {
                document: self.id.clone(),
            });
        }
    }

    pub fn update_owner(&mut self, name: Option<String>, email: Option<String>, url: Option<String>) {
        let track = self.remote_backed;
        let mut changed = self.owner_name.set(name, track);
        changed |= self.owner_email.set(email, track);
        changed |= self.owner_url.set(url, track);
        if changed {
            self.touch_outline();
        }
    }

    pub fn add_tag(&mut self, name: &str) {
        let track = self.remote_backed;
        let changed = self.tag_names.update(track, |tags| {
            if !tags.iter().any(|t| t == name) {
                tags.push(name.to_string());
            }
        });
        if changed {
            self.touch_outline();
            self.events.publish(OutlineEvent::TagsChanged {
                document: self.id.clone(),
            });
        }
    }

    pub fn remove_tag(&mut self, name: &str) {
        let track = self.remote_backed;
        if self.tag_names.update(track, |tags| tags.retain(|t| t != name)) {
            self.touch_outline();
            self.events.publish(OutlineEvent::TagsChanged {
                document: self.id.clone(),
            });
        }
    }

    /// Attaches an image to the row its id names.
    pub fn add_image(&mut self, image: Image) -> OutlineResult<()> {
        let row_id = image
            .id
            .row_uuid()
            .filter(|_| image.id.document_id().as_ref() == Some(&self.id))
            .ok_or_else(|| OutlineError::ForeignEntity(image.id.clone()))?
            .to_string();
        let row = self
            .rows
            .get_mut(&row_id)
            .ok_or_else(|| OutlineError::RowNotFound(row_id.clone()))?;
        let image_id = image.id.clone();
        row.images.retain(|i| i.id != image_id);
        row.images.push(image);
        row.images.sort_by_key(|i| (i.is_in_notes, i.offset));
        self.request_push(image_id);
        Ok(())
    }

    pub fn remove_image(&mut self, image_id: &EntityId) -> OutlineResult<()> {
        let row_id = image_id
            .row_uuid()
            .ok_or_else(|| OutlineError::ForeignEntity(image_id.clone()))?;
        let row = self
            .rows
            .get_mut(row_id)
            .ok_or_else(|| OutlineError::RowNotFound(row_id.to_string()))?;
        row.images.retain(|i| &i.id != image_id);
        self.request_push(image_id.clone());
        Ok(())
    }

    /// Removes a row the remote store deleted. Child lists and shadows that
    /// mention it are cleaned without recording a local edit.
    pub(crate) fn remove_remote_row(&mut self, row_id: &str) -> bool {
        self.tombstones.remove(row_id);
        if self.rows.remove(row_id).is_none() {
            return false;
        }
        self.parents.remove(row_id);
        self.row_order.retain_everywhere(|id| id != row_id);
        for row in self.rows.values_mut() {
            row.row_order.retain_everywhere(|id| id != row_id);
        }
        true
    }

    /// Forgets the tombstone once the remote delete is confirmed.
    pub fn confirm_delete(&mut self, id: &EntityId) {
        if let Some(row_id) = id.row_uuid().filter(|_| id.image_uuid().is_none()) {
            self.tombstones.remove(row_id);
        }
    }
}

impl RowContainer for Outline {
    fn row_ids(&self) -> &[String] {
        self.row_order.get()
    }
}
