//! Property-based tests for ordering keys, merges and the sequence diff.
//!
//! - Keys from `between` always land strictly inside their bounds
//! - The conflict resolver is total and keeps the client when nothing opposes it
//! - Replaying a diff onto the old sequence reproduces the new sequence
//! - Sequence merges never lose an insertion made on either side

use outline_crdt::{FractionalIndex, MergeScenario, SequenceDiff, merge_sequence, merge_value};
use proptest::prelude::*;
use std::collections::HashSet;

// =============================================================================
// HELPER STRATEGIES
// =============================================================================

fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[0-9A-Za-z]{0,7}[1-9A-Za-z]").unwrap()
}

fn ordered_pair() -> impl Strategy<Value = (String, String)> {
    (key_strategy(), key_strategy())
        .prop_filter("distinct", |(a, b)| a != b)
        .prop_map(|(a, b)| if a < b { (a, b) } else { (b, a) })
}

fn unique_seq(max: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(0u8..40, 0..max).prop_map(|v| {
        let mut seen = HashSet::new();
        v.into_iter().filter(|x| seen.insert(*x)).collect()
    })
}

/// Rebuilds `new` from `old` using only the diff and the inserted elements.
fn replay(old: &[u8], new: &[u8], diff: &SequenceDiff) -> Vec<u8> {
    let removed: HashSet<usize> = diff.removals.iter().copied().collect();
    let moved_from: HashSet<usize> = diff.moves.iter().map(|m| m.from).collect();
    let mut survivors = old
        .iter()
        .enumerate()
        .filter(|(i, _)| !removed.contains(i) && !moved_from.contains(i))
        .map(|(_, e)| *e);

    let mut out: Vec<Option<u8>> = vec![None; new.len()];
    for &j in &diff.insertions {
        out[j] = Some(new[j]);
    }
    for m in &diff.moves {
        out[m.to] = Some(old[m.from]);
    }
    out.into_iter()
        .map(|slot| slot.or_else(|| survivors.next()).unwrap())
        .collect()
}

// =============================================================================
// ORDERING KEY PROPERTY TESTS
// =============================================================================

mod ordering_properties {
    use super::*;

    proptest! {
        #[test]
        fn between_is_strictly_inside((a, b) in ordered_pair()) {
            let k = FractionalIndex::between(Some(&a), Some(&b));
            prop_assert!(a < k, "{} !< {}", a, k);
            prop_assert!(k < b, "{} !< {}", k, b);
            prop_assert!(FractionalIndex::is_valid(&k));
        }

        #[test]
        fn between_open_ends(a in key_strategy()) {
            let above = FractionalIndex::between(Some(&a), None);
            let below = FractionalIndex::between(None, Some(&a));
            prop_assert!(above > a);
            prop_assert!(below < a);
        }

        #[test]
        fn repeated_splits_stay_ordered((a, b) in ordered_pair(), steps in 1usize..40) {
            let mut upper = b.clone();
            for _ in 0..steps {
                let k = FractionalIndex::between(Some(&a), Some(&upper));
                prop_assert!(a < k && k < upper);
                upper = k;
            }
        }
    }
}

// =============================================================================
// CONFLICT RESOLVER PROPERTY TESTS
// =============================================================================

mod resolver_properties {
    use super::*;

    proptest! {
        #[test]
        fn scalar_merge_is_total(
            client in prop::option::of(0u8..4),
            ancestor in prop::option::of(0u8..4),
            server in prop::option::of(0u8..4),
        ) {
            let merged = merge_value(client.as_ref(), ancestor.as_ref(), server.as_ref());
            prop_assert!(merged == client || merged == server);
        }

        #[test]
        fn unopposed_client_wins(client in prop::option::of(any::<u32>())) {
            prop_assert_eq!(
                MergeScenario::evaluate(client.as_ref(), None, None),
                MergeScenario::ClientWins
            );
            prop_assert_eq!(merge_value(client.as_ref(), None, None), client);
        }

        #[test]
        fn sequence_merge_keeps_both_sides_insertions(
            ancestor in unique_seq(12),
            client_extra in unique_seq(6),
            server_extra in unique_seq(6),
        ) {
            let client: Vec<u8> = ancestor.iter().copied().chain(client_extra.iter().map(|x| x + 100)).collect();
            let server: Vec<u8> = server_extra.iter().map(|x| x + 200).chain(ancestor.iter().copied()).collect();

            let merged = merge_sequence(Some(&client[..]), Some(&ancestor[..]), Some(&server[..]))
                .unwrap_or_default();

            let unique: HashSet<u8> = merged.iter().copied().collect();
            prop_assert_eq!(unique.len(), merged.len());
            for x in client.iter().chain(server.iter()) {
                prop_assert!(unique.contains(x));
            }
        }
    }
}

// =============================================================================
// SEQUENCE DIFF PROPERTY TESTS
// =============================================================================

mod diff_properties {
    use super::*;

    proptest! {
        #[test]
        fn diff_replays_exactly(old in unique_seq(30), new in unique_seq(30)) {
            let diff = SequenceDiff::compute(&old, &new);
            prop_assert_eq!(replay(&old, &new, &diff), new);
        }

        #[test]
        fn identical_sequences_have_empty_diff(seq in unique_seq(30)) {
            prop_assert!(SequenceDiff::compute(&seq, &seq).is_empty());
        }
    }
}
