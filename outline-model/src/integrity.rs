//! Structural integrity checks.
//!
//! The child lists are the only source of structure, so remote deltas that
//! arrive out of order can leave them inconsistent with the row map. Three
//! shapes are detected: rows no list reaches, list entries with no row, and
//! rows listed more than once. Repair never drops a row.

use crate::container::{ContainerId, RowContainer};
use crate::outline::Outline;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, warn};

/// What [`Outline::corruption_report`] found, or what [`Outline::repair`] fixed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorruptionReport {
    /// Rows not reachable from the root, sorted by id.
    pub orphans: Vec<String>,
    /// `(container, id)` entries whose row does not exist.
    pub dangling: Vec<(ContainerId, String)>,
    /// `(container, id)` entries repeating a row already listed earlier in
    /// depth-first order.
    pub duplicates: Vec<(ContainerId, String)>,
}

impl CorruptionReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.orphans.is_empty() && self.dangling.is_empty() && self.duplicates.is_empty()
    }
}

#[derive(Default)]
struct Walk {
    /// `(container, position, id)` of every repeated reference.
    duplicates: Vec<(ContainerId, usize, String)>,
    unreached: BTreeSet<String>,
}

impl Outline {
    pub fn corruption_report(&self) -> CorruptionReport {
        let walk = self.walk();
        CorruptionReport {
            orphans: walk.unreached.into_iter().collect(),
            dangling: self.dangling_references(),
            duplicates: walk
                .duplicates
                .into_iter()
                .map(|(container, _, id)| (container, id))
                .collect(),
        }
    }

    pub fn is_corrupted(&self) -> bool {
        !self.corruption_report().is_clean()
    }

    /// Restores the structural invariants and returns what was wrong.
    ///
    /// Dangling entries are stripped, repeated references keep their first
    /// depth-first occurrence and unreachable subtrees are appended to the
    /// root. Every touched container is pushed.
    pub fn repair(&mut self) -> CorruptionReport {
        let report = self.corruption_report();
        if report.is_clean() {
            return report;
        }
        warn!(
            document = %self.id,
            orphans = report.orphans.len(),
            dangling = report.dangling.len(),
            duplicates = report.duplicates.len(),
            "repairing corrupted outline"
        );

        self.begin_batch();
        let track = self.remote_backed;

        let dangling_in: BTreeSet<ContainerId> =
            report.dangling.iter().map(|(c, _)| c.clone()).collect();
        for container in dangling_in {
            let rows = &self.rows;
            let stripped = match container {
                ContainerId::Root => self
                    .row_order
                    .update(track, |o| o.retain(|id| rows.contains_key(id))),
                ContainerId::Row(ref id) => {
                    let keep: HashSet<String> = rows.keys().cloned().collect();
                    self.rows
                        .get_mut(id)
                        .is_some_and(|row| row.row_order.update(track, |o| o.retain(|c| keep.contains(c))))
                }
            };
            if stripped {
                self.touch_container(&container);
            }
        }

        loop {
            let walk = self.walk();
            self.drop_duplicates(walk.duplicates, track);
            if walk.unreached.is_empty() {
                break;
            }
            for root in self.orphan_roots(&walk.unreached, track) {
                debug!(document = %self.id, row = %root, "reattaching orphan at root");
                let at = self.row_order.get().len();
                self.row_order.update(track, |o| o.push(root.clone()));
                self.assign_order_key(&ContainerId::Root, at);
                self.touch_outline();
            }
        }
        self.end_batch();

        self.rebuild_parents();
        self.refresh_shadow_table(&[]);
        report
    }

    /// Depth-first walk from the root, skipping dangling entries.
    fn walk(&self) -> Walk {
        let mut seen: HashSet<&str> = HashSet::with_capacity(self.rows.len());
        let mut walk = Walk::default();
        let mut stack = vec![(ContainerId::Root, 0usize)];

        while let Some((container, pos)) = stack.pop() {
            let Some(id) = self.order_of(&container).and_then(|o| o.get().get(pos)) else {
                continue;
            };
            stack.push((container.clone(), pos + 1));
            if !self.rows.contains_key(id) {
                continue;
            }
            if !seen.insert(id.as_str()) {
                walk.duplicates.push((container, pos, id.clone()));
                continue;
            }
            stack.push((ContainerId::Row(id.clone()), 0));
        }

        walk.unreached = self
            .rows
            .keys()
            .filter(|id| !seen.contains(id.as_str()))
            .cloned()
            .collect();
        walk
    }

    fn dangling_references(&self) -> Vec<(ContainerId, String)> {
        let mut out: Vec<(ContainerId, String)> = self
            .row_ids()
            .iter()
            .filter(|id| !self.rows.contains_key(*id))
            .map(|id| (ContainerId::Root, id.clone()))
            .collect();
        for (row_id, row) in &self.rows {
            out.extend(
                row.row_ids()
                    .iter()
                    .filter(|id| !self.rows.contains_key(*id))
                    .map(|id| (ContainerId::Row(row_id.clone()), id.clone())),
            );
        }
        out.sort();
        out
    }

    fn drop_duplicates(&mut self, duplicates: Vec<(ContainerId, usize, String)>, track: bool) {
        let mut by_container: BTreeMap<ContainerId, Vec<usize>> = BTreeMap::new();
        for (container, pos, _) in duplicates {
            by_container.entry(container).or_default().push(pos);
        }
        for (container, mut positions) in by_container {
            positions.sort_unstable_by(|a, b| b.cmp(a));
            if let Some(order) = self.order_of_mut(&container) {
                order.update(track, |o| {
                    for pos in positions {
                        if pos < o.len() {
                            o.remove(pos);
                        }
                    }
                });
            }
            self.touch_container(&container);
        }
    }

    /// Unreached rows that no other unreached row lists. When every
    /// unreached row is listed by another (a detached cycle), the smallest
    /// id is cut out of its listers and becomes the root.
    fn orphan_roots(&mut self, unreached: &BTreeSet<String>, track: bool) -> Vec<String> {
        let listed: HashSet<&String> = unreached
            .iter()
            .filter_map(|id| self.rows.get(id))
            .flat_map(|row| row.row_ids())
            .filter(|child| unreached.contains(*child))
            .collect();
        let roots: Vec<String> = unreached
            .iter()
            .filter(|id| !listed.contains(id))
            .cloned()
            .collect();
        if !roots.is_empty() {
            return roots;
        }

        let Some(cut) = unreached.first().cloned() else {
            return Vec::new();
        };
        for lister in unreached {
            let changed = self
                .rows
                .get_mut(lister)
                .is_some_and(|row| row.row_order.update(track, |o| o.retain(|c| c != &cut)));
            if changed {
                self.touch_row(lister);
            }
        }
        vec![cut]
    }
}
