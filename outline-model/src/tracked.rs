//! Field values with ancestor and server shadows.
//!
//! A [`Tracked`] field remembers the value it had when a local edit began
//! (the ancestor) and, while a merge is being resolved, the server's value.
//! Those two slots are what three-way merge needs.

use outline_crdt::{merge_sequence, merge_value};
use std::hash::Hash;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tracked<T> {
    value: T,
    ancestor: Option<T>,
    server: Option<T>,
}

impl<T: Clone + PartialEq> Tracked<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            ancestor: None,
            server: None,
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn ancestor(&self) -> Option<&T> {
        self.ancestor.as_ref()
    }

    pub fn server(&self) -> Option<&T> {
        self.server.as_ref()
    }

    pub fn has_shadows(&self) -> bool {
        self.ancestor.is_some() || self.server.is_some()
    }

    /// Replaces the value. With `track` set, the current value becomes the
    /// ancestor unless one is already recorded. Returns whether it changed.
    pub fn set(&mut self, value: T, track: bool) -> bool {
        if self.value == value {
            return false;
        }
        if track && self.ancestor.is_none() {
            self.ancestor = Some(self.value.clone());
        }
        self.value = value;
        true
    }

    /// Edits the value in place under the same ancestor rule as [`Tracked::set`].
    pub fn update(&mut self, track: bool, edit: impl FnOnce(&mut T)) -> bool {
        let mut next = self.value.clone();
        edit(&mut next);
        self.set(next, track)
    }

    pub fn set_server(&mut self, value: T) {
        self.server = Some(value);
    }

    /// Folds the staged server value into the field with a scalar merge.
    pub fn resolve(&mut self) -> bool {
        let merged = merge_value(Some(&self.value), self.ancestor.as_ref(), self.server.as_ref())
            .unwrap_or_else(|| self.value.clone());
        self.settle(merged)
    }

    /// Records `saved` as the server's current value after a successful push.
    pub fn rebase(&mut self, saved: T) {
        self.server = None;
        self.ancestor = (self.value != saved).then_some(saved);
    }

    pub fn clear_shadows(&mut self) {
        self.ancestor = None;
        self.server = None;
    }

    fn settle(&mut self, merged: T) -> bool {
        let changed = merged != self.value;
        self.value = merged;
        // A surviving local edit now diverges from the server value, which
        // becomes the base for the next merge.
        self.ancestor = match self.server.take() {
            Some(server) if server != self.value => Some(server),
            _ => None,
        };
        changed
    }
}

impl<E: Clone + Eq + Hash> Tracked<Vec<E>> {
    /// Folds the staged server value into the field with a sequence merge.
    pub fn resolve_sequence(&mut self) -> bool {
        let merged = merge_sequence(
            Some(self.value.as_slice()),
            self.ancestor.as_deref(),
            self.server.as_deref(),
        )
        .unwrap_or_else(|| self.value.clone());
        self.settle(merged)
    }

    /// Drops matching elements from the value and both shadows.
    pub fn retain_everywhere(&mut self, mut keep: impl FnMut(&E) -> bool) -> bool {
        let before = self.value.len();
        self.value.retain(&mut keep);
        if let Some(ancestor) = self.ancestor.as_mut() {
            ancestor.retain(&mut keep);
        }
        if let Some(server) = self.server.as_mut() {
            server.retain(&mut keep);
        }
        before != self.value.len()
    }
}
