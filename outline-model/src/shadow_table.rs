//! Display-list reconciliation.
//!
//! The shadow table is the flattened, display-ordered projection of the row
//! tree. It honours expansion, the completed filter, search and focus, and is
//! rebuilt from scratch whenever structure or visibility changes. Consecutive
//! builds are compared with an ordered diff that infers moves, so a list view
//! can animate the change with inserts, deletes, moves and reloads.

use crate::container::RowContainer;
use crate::events::OutlineEvent;
use crate::outline::Outline;
use crate::search::SearchState;
use outline_crdt::{Move, SequenceDiff};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// One visible row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowEntry {
    pub row_id: String,
    pub index: usize,
    /// Indentation depth, zero for the top visible level.
    pub level: usize,
}

/// Which part of the document view a change set applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Section {
    Title,
    Tags,
    #[default]
    Rows,
}

/// Index changes between two display lists.
///
/// `deletes` and `Move::from` are offsets in the old list; `inserts`,
/// `Move::to` and `reloads` are offsets in the new list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShadowTableChanges {
    pub section: Section,
    pub deletes: BTreeSet<usize>,
    pub inserts: BTreeSet<usize>,
    pub moves: BTreeSet<Move>,
    pub reloads: BTreeSet<usize>,
}

impl ShadowTableChanges {
    #[must_use]
    pub fn new(section: Section) -> Self {
        Self {
            section,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty()
            && self.inserts.is_empty()
            && self.moves.is_empty()
            && self.reloads.is_empty()
    }

    #[must_use]
    pub fn is_only_reloads(&self) -> bool {
        self.deletes.is_empty() && self.inserts.is_empty() && self.moves.is_empty()
    }

    /// Merges another change set of the same section into this one.
    pub fn append(&mut self, other: ShadowTableChanges) {
        self.deletes.extend(other.deletes);
        self.inserts.extend(other.inserts);
        self.moves.extend(other.moves);
        self.reloads.extend(other.reloads);
    }
}

/// The flattened row list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShadowTable {
    entries: Vec<ShadowEntry>,
    positions: HashMap<String, usize>,
}

impl ShadowTable {
    /// Flattens `outline` under its current view state.
    #[must_use]
    pub fn build(outline: &Outline) -> Self {
        let view = outline.view();
        let searching = view.search != SearchState::NotSearching;
        let filtering_search = view.search == SearchState::Searching;

        let mut builder = Builder {
            outline,
            completed_filter: view.completed_filter,
            ignore_expansion: searching,
            search_hits: filtering_search.then_some(&view.search_hits),
            visited: HashSet::new(),
            table: Self::default(),
        };

        match view.focus.as_deref() {
            Some(focus) if outline.row(focus).is_some() => builder.visit(focus, 0),
            _ => {
                for id in outline.row_ids() {
                    builder.visit(id, 0);
                }
            }
        }

        builder.table
    }

    pub fn entries(&self) -> &[ShadowEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ShadowEntry> {
        self.entries.get(index)
    }

    pub fn index_of(&self, row_id: &str) -> Option<usize> {
        self.positions.get(row_id).copied()
    }

    pub fn row_ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.row_id.as_str()).collect()
    }

    /// Changes that turn `self` into `next`.
    #[must_use]
    pub fn diff(&self, next: &ShadowTable) -> ShadowTableChanges {
        let diff = SequenceDiff::compute(&self.row_ids(), &next.row_ids());
        let mut changes = ShadowTableChanges::new(Section::Rows);
        changes.deletes.extend(diff.removals);
        changes.inserts.extend(diff.insertions);
        changes.moves.extend(diff.moves);

        // Rows that stayed in place but changed depth need redrawing.
        let moved: HashSet<usize> = changes.moves.iter().map(|m| m.to).collect();
        for entry in &next.entries {
            if changes.inserts.contains(&entry.index) || moved.contains(&entry.index) {
                continue;
            }
            if let Some(old) = self.index_of(&entry.row_id).and_then(|i| self.get(i)) {
                if old.level != entry.level {
                    changes.reloads.insert(entry.index);
                }
            }
        }
        changes
    }

    fn push(&mut self, row_id: &str, level: usize) {
        let index = self.entries.len();
        self.positions.insert(row_id.to_string(), index);
        self.entries.push(ShadowEntry {
            row_id: row_id.to_string(),
            index,
            level,
        });
    }
}

struct Builder<'a> {
    outline: &'a Outline,
    completed_filter: bool,
    ignore_expansion: bool,
    search_hits: Option<&'a HashSet<String>>,
    visited: HashSet<&'a str>,
    table: ShadowTable,
}

impl<'a> Builder<'a> {
    /// Walks the subtree at `root` depth first with an explicit stack.
    fn visit(&mut self, root: &'a str, level: usize) {
        let mut stack: Vec<(&'a str, usize)> = vec![(root, level)];
        while let Some((row_id, level)) = stack.pop() {
            if !self.visited.insert(row_id) {
                continue;
            }
            let Some(row) = self.outline.row(row_id) else {
                continue;
            };

            let filtered = (self.completed_filter && row.is_complete())
                || self.search_hits.is_some_and(|hits| !hits.contains(row_id));
            if !filtered {
                self.table.push(row_id, level);
            }

            if !filtered && (row.is_expanded() || self.ignore_expansion) {
                stack.extend(row.row_ids().iter().rev().map(|child| (child.as_str(), level + 1)));
            }
        }
    }
}

impl Outline {
    pub fn shadow_table(&self) -> Option<&ShadowTable> {
        self.shadow_table.as_ref()
    }

    /// Builds the shadow table if it is not loaded yet.
    pub fn load_shadow_table(&mut self) -> &ShadowTable {
        let table = match self.shadow_table.take() {
            Some(table) => table,
            None => ShadowTable::build(self),
        };
        self.shadow_table.insert(table)
    }

    /// Drops the transient view data when the document leaves memory.
    pub fn unload_shadow_table(&mut self) {
        self.shadow_table = None;
    }

    /// Rebuilds the shadow table and returns the changes since the last build.
    ///
    /// When no table was loaded the new one is installed and no changes are
    /// reported.
    pub fn rebuild_shadow_table(&mut self) -> ShadowTableChanges {
        let next = ShadowTable::build(self);
        let changes = match self.shadow_table.as_ref() {
            Some(previous) => previous.diff(&next),
            None => ShadowTableChanges::new(Section::Rows),
        };
        debug!(
            document = %self.id(),
            rows = next.len(),
            inserts = changes.inserts.len(),
            deletes = changes.deletes.len(),
            moves = changes.moves.len(),
            "rebuilt shadow table"
        );
        self.shadow_table = Some(next);
        changes
    }

    /// Rebuilds a loaded shadow table and publishes the changes.
    pub(crate) fn refresh_shadow_table(&mut self, reload_rows: &[String]) -> ShadowTableChanges {
        if self.shadow_table.is_none() {
            return ShadowTableChanges::new(Section::Rows);
        }
        let mut changes = self.rebuild_shadow_table();
        changes.reloads.extend(self.reload_indices(reload_rows, &changes));
        if !changes.is_empty() {
            self.events.publish(OutlineEvent::StructuralChange {
                document: self.id().clone(),
                changes: changes.clone(),
            });
        }
        changes
    }

    /// Display indices of `row_ids` and their visible descendants, excluding
    /// rows that are already being inserted or moved.
    fn reload_indices(&self, row_ids: &[String], changes: &ShadowTableChanges) -> BTreeSet<usize> {
        let Some(table) = self.shadow_table.as_ref() else {
            return BTreeSet::new();
        };
        let moved: HashSet<usize> = changes.moves.iter().map(|m| m.to).collect();

        row_ids
            .iter()
            .flat_map(|id| std::iter::once(id.clone()).chain(self.descendants(id)))
            .filter_map(|id| table.index_of(&id))
            .filter(|i| !changes.inserts.contains(i) && !moved.contains(i))
            .collect()
    }

    pub fn expand(&mut self, row_id: &str) -> ShadowTableChanges {
        self.set_expanded(row_id, true)
    }

    pub fn collapse(&mut self, row_id: &str) -> ShadowTableChanges {
        self.set_expanded(row_id, false)
    }

    pub fn expand_all(&mut self) -> ShadowTableChanges {
        self.set_all_expanded(true)
    }

    pub fn collapse_all(&mut self) -> ShadowTableChanges {
        self.set_all_expanded(false)
    }

    fn set_expanded(&mut self, row_id: &str, expanded: bool) -> ShadowTableChanges {
        match self.rows.get_mut(row_id) {
            Some(row) if row.is_expanded != expanded => row.is_expanded = expanded,
            _ => return ShadowTableChanges::new(Section::Rows),
        }
        self.refresh_shadow_table(&[row_id.to_string()])
    }

    fn set_all_expanded(&mut self, expanded: bool) -> ShadowTableChanges {
        let mut touched = Vec::new();
        for (id, row) in &mut self.rows {
            if row.is_expanded != expanded && !row.row_ids().is_empty() {
                row.is_expanded = expanded;
                touched.push(id.clone());
            }
        }
        self.refresh_shadow_table(&touched)
    }

    pub fn toggle_completed_filter(&mut self) -> ShadowTableChanges {
        self.view.completed_filter = !self.view.completed_filter;
        self.refresh_shadow_table(&[])
    }

    /// Notes are hidden or shown in place, so every visible row reloads.
    pub fn toggle_notes_filter(&mut self) -> ShadowTableChanges {
        self.view.notes_filter = !self.view.notes_filter;
        if self.shadow_table.is_none() {
            return ShadowTableChanges::new(Section::Rows);
        }
        let mut changes = self.rebuild_shadow_table();
        let moved: HashSet<usize> = changes.moves.iter().map(|m| m.to).collect();
        let visible = self.shadow_table.as_ref().map_or(0, ShadowTable::len);
        changes
            .reloads
            .extend((0..visible).filter(|i| !changes.inserts.contains(i) && !moved.contains(i)));
        self.events.publish(OutlineEvent::StructuralChange {
            document: self.id().clone(),
            changes: changes.clone(),
        });
        changes
    }

    /// Restricts the display to `row_id` and its descendants.
    pub fn focus_in(&mut self, row_id: &str) -> ShadowTableChanges {
        if self.row(row_id).is_none() {
            return ShadowTableChanges::new(Section::Rows);
        }
        self.view.focus = Some(row_id.to_string());
        self.refresh_shadow_table(&[])
    }

    pub fn focus_out(&mut self) -> ShadowTableChanges {
        if self.view.focus.take().is_none() {
            return ShadowTableChanges::new(Section::Rows);
        }
        self.refresh_shadow_table(&[])
    }

    pub fn focus_row(&self) -> Option<&str> {
        self.view.focus.as_deref()
    }
}
