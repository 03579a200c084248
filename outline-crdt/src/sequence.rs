//! Ordered-sequence diff with move inference.
//!
//! Elements are treated as identities: a sequence is an ordered set, and a
//! repeated element after its first occurrence is reported as removed (old
//! side) or inserted (new side). Elements present on both sides keep their
//! place when they belong to the longest run that preserved relative order;
//! the rest are reported as moves.
//!
//! Applying a [`SequenceDiff`] works the way table views apply batch updates:
//! removals and move sources refer to offsets in the old sequence, insertions
//! and move targets refer to offsets in the new sequence.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// An element that moved from `from` (old offset) to `to` (new offset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Move {
    pub from: usize,
    pub to: usize,
}

/// Difference between two ordered sequences.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceDiff {
    /// Offsets in the old sequence whose element is gone.
    pub removals: Vec<usize>,
    /// Offsets in the new sequence whose element is new.
    pub insertions: Vec<usize>,
    /// Elements present on both sides that changed relative order.
    pub moves: Vec<Move>,
}

impl SequenceDiff {
    /// Computes the difference from `old` to `new`.
    #[must_use]
    pub fn compute<T: Eq + Hash>(old: &[T], new: &[T]) -> Self {
        let mut new_offsets: HashMap<&T, usize> = HashMap::with_capacity(new.len());
        for (j, element) in new.iter().enumerate() {
            new_offsets.entry(element).or_insert(j);
        }

        let mut seen = HashSet::with_capacity(old.len());
        let mut removals = Vec::new();
        let mut pairs = Vec::new();
        for (i, element) in old.iter().enumerate() {
            if !seen.insert(element) {
                removals.push(i);
                continue;
            }
            match new_offsets.get(element) {
                Some(&j) => pairs.push((i, j)),
                None => removals.push(i),
            }
        }

        let stable = longest_increasing_run(&pairs);
        let matched: HashSet<usize> = pairs.iter().map(|&(_, j)| j).collect();

        let moves = pairs
            .iter()
            .enumerate()
            .filter(|(k, _)| !stable.contains(k))
            .map(|(_, &(from, to))| Move { from, to })
            .collect();

        let insertions = (0..new.len()).filter(|j| !matched.contains(j)).collect();

        Self {
            removals,
            insertions,
            moves,
        }
    }

    /// Whether the two sequences were identical.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.insertions.is_empty() && self.moves.is_empty()
    }
}

/// Indices into `pairs` forming the longest subsequence with increasing
/// new offsets. `pairs` is already sorted by old offset.
fn longest_increasing_run(pairs: &[(usize, usize)]) -> HashSet<usize> {
    // tails[len] = index into pairs of the smallest tail for a run of len + 1
    let mut tails: Vec<usize> = Vec::new();
    let mut previous: Vec<Option<usize>> = vec![None; pairs.len()];

    for (k, &(_, j)) in pairs.iter().enumerate() {
        let pos = tails.partition_point(|&t| pairs[t].1 < j);
        if pos > 0 {
            previous[k] = Some(tails[pos - 1]);
        }
        if pos == tails.len() {
            tails.push(k);
        } else {
            tails[pos] = k;
        }
    }

    let mut run = HashSet::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(k) = cursor {
        run.insert(k);
        cursor = previous[k];
    }
    run
}

/// Removes repeated elements, keeping first occurrences.
#[must_use]
pub fn dedupe<T: Clone + Eq + Hash>(items: &[T]) -> Vec<T> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .iter()
        .filter(|item| seen.insert(*item))
        .cloned()
        .collect()
}
