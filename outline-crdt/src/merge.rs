//! Field-level three-way merge.
//!
//! Every synchronizable field is reconciled from three values: the client's
//! current value, the ancestor (the value recorded when the local edit began)
//! and the server's value. [`MergeScenario::evaluate`] classifies the triple;
//! [`merge_value`] and [`merge_sequence`] produce the reconciled value.
//!
//! All functions here are pure and total.

use crate::sequence::{SequenceDiff, dedupe};
use std::collections::HashSet;
use std::hash::Hash;

/// Outcome of classifying a `(client, ancestor, server)` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeScenario {
    /// The local edit is unopposed.
    ClientWins,
    /// No local edit in flight, or the client dropped a value the server changed.
    ServerWins,
    /// Both sides changed the field since the ancestor.
    ThreeWayMerge,
}

impl MergeScenario {
    #[must_use]
    pub fn evaluate<T: PartialEq + ?Sized>(
        client: Option<&T>,
        ancestor: Option<&T>,
        server: Option<&T>,
    ) -> Self {
        match (ancestor, server) {
            (_, None) => Self::ClientWins,
            (Some(ancestor), Some(server)) if ancestor == server => Self::ClientWins,
            (Some(_), Some(_)) if client.is_none() => Self::ServerWins,
            (Some(_), Some(_)) => Self::ThreeWayMerge,
            (None, Some(_)) => Self::ServerWins,
        }
    }
}

/// Merges a scalar field.
///
/// True concurrent edits keep the client's value: the last local writer wins.
#[must_use]
pub fn merge_value<T: Clone + PartialEq>(
    client: Option<&T>,
    ancestor: Option<&T>,
    server: Option<&T>,
) -> Option<T> {
    match MergeScenario::evaluate(client, ancestor, server) {
        MergeScenario::ClientWins | MergeScenario::ThreeWayMerge => client.cloned(),
        MergeScenario::ServerWins => server.cloned(),
    }
}

/// Merges an ordered-set field such as a row order or a tag list.
///
/// On concurrent edits the server's changes relative to the ancestor are
/// replayed onto the client's sequence, so local insertions and deletions the
/// server never saw survive.
#[must_use]
pub fn merge_sequence<T: Clone + Eq + Hash>(
    client: Option<&[T]>,
    ancestor: Option<&[T]>,
    server: Option<&[T]>,
) -> Option<Vec<T>> {
    match MergeScenario::evaluate(client, ancestor, server) {
        MergeScenario::ClientWins => client.map(dedupe),
        MergeScenario::ServerWins => server.map(dedupe),
        MergeScenario::ThreeWayMerge => {
            let client = client.unwrap_or_default();
            let ancestor = ancestor.unwrap_or_default();
            let server = server.unwrap_or_default();
            Some(replay(client, ancestor, server))
        }
    }
}

fn replay<T: Clone + Eq + Hash>(client: &[T], ancestor: &[T], server: &[T]) -> Vec<T> {
    let ancestor = dedupe(ancestor);
    let server = dedupe(server);
    let diff = SequenceDiff::compute(&ancestor, &server);

    let mut result = dedupe(client);

    for &offset in &diff.removals {
        let gone = &ancestor[offset];
        result.retain(|e| e != gone);
    }

    let moved: HashSet<usize> = diff.moves.iter().map(|m| m.to).collect();
    let mut placements: Vec<usize> = diff.insertions.iter().copied().chain(moved.iter().copied()).collect();
    placements.sort_unstable();

    for offset in placements {
        let element = &server[offset];
        if moved.contains(&offset) && !result.contains(element) {
            // Deleted locally; a remote reorder does not bring it back.
            continue;
        }
        result.retain(|e| e != element);

        let anchor = server[..offset]
            .iter()
            .rev()
            .find_map(|prior| result.iter().position(|e| e == prior));
        let at = anchor.map_or(0, |i| i + 1);
        result.insert(at, element.clone());
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn v(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn seq(client: &[&str], ancestor: &[&str], server: &[&str]) -> Vec<String> {
        let (client, ancestor, server) = (v(client), v(ancestor), v(server));
        merge_sequence(
            Some(client.as_slice()),
            Some(ancestor.as_slice()),
            Some(server.as_slice()),
        )
        .unwrap_or_default()
    }

    #[test]
    fn classification() {
        use MergeScenario::*;
        assert_eq!(MergeScenario::evaluate(Some(&1), Some(&0), Some(&0)), ClientWins);
        assert_eq!(MergeScenario::evaluate(Some(&1), Some(&0), None), ClientWins);
        assert_eq!(MergeScenario::evaluate(Some(&1), None, Some(&2)), ServerWins);
        assert_eq!(MergeScenario::evaluate(None, Some(&0), Some(&2)), ServerWins);
        assert_eq!(MergeScenario::evaluate(Some(&1), Some(&0), Some(&2)), ThreeWayMerge);
        assert_eq!(MergeScenario::evaluate::<i32>(None, None, None), ClientWins);
    }

    #[test]
    fn scalar_conflict_keeps_client() {
        assert_eq!(merge_value(Some(&"mine"), Some(&"base"), Some(&"theirs")), Some("mine"));
        assert_eq!(merge_value(Some(&"mine"), None, Some(&"theirs")), Some("theirs"));
        assert_eq!(merge_value(Some(&"mine"), None, None), Some("mine"));
    }

    #[test]
    fn sequence_keeps_both_appends() {
        let merged = seq(&["a"], &[], &["b"]);
        assert_eq!(merged, v(&["b", "a"]));
    }

    #[test]
    fn sequence_applies_server_removal() {
        let merged = seq(
            &["a", "b", "c", "x"],
            &["a", "b", "c"],
            &["a", "c"],
        );
        assert_eq!(merged, v(&["a", "c", "x"]));
    }

    #[test]
    fn sequence_keeps_local_removal() {
        let merged = seq(
            &["a", "c"],
            &["a", "b", "c"],
            &["a", "b", "c", "d"],
        );
        assert_eq!(merged, v(&["a", "c", "d"]));
    }

    #[test]
    fn sequence_replays_server_move() {
        let merged = seq(
            &["a", "b", "c", "x"],
            &["a", "b", "c"],
            &["c", "a", "b"],
        );
        assert_eq!(merged, v(&["c", "a", "b", "x"]));
    }

    #[test]
    fn sequence_server_move_of_locally_deleted_element() {
        let merged = seq(
            &["a", "b"],
            &["a", "b", "c"],
            &["c", "a", "b"],
        );
        assert_eq!(merged, v(&["a", "b"]));
    }

    #[test]
    fn sequence_dedupes_client_wins() {
        let merged = seq(&["a", "a", "b"], &["a"], &["a"]);
        assert_eq!(merged, v(&["a", "b"]));
    }
}
