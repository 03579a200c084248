use outline_model::{
    ChangeApplier, ContainerId, OutlineError, Outline, PushRequestSink, Row, RowContainer,
};
use outline_types::{EntityId, RecordBody, RemoteRecord, RowRecord};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

const ACCOUNT: i64 = 7;

fn doc() -> EntityId {
    EntityId::Document(ACCOUNT, "doc".into())
}

fn row_entity(id: &str) -> EntityId {
    EntityId::Row(ACCOUNT, "doc".into(), id.into())
}

fn row(id: &str) -> Row {
    Row::new(row_entity(id)).with_topic(id)
}

fn ids(container: &dyn RowContainer) -> Vec<&str> {
    container.row_ids().iter().map(String::as_str).collect()
}

/// root: a(b, c), d
fn sample(remote: bool) -> Outline {
    let mut o = Outline::new(doc()).with_remote(remote);
    o.append_row(row("a"), &ContainerId::Root).unwrap();
    o.append_row(row("b"), &ContainerId::row("a")).unwrap();
    o.append_row(row("c"), &ContainerId::row("a")).unwrap();
    o.append_row(row("d"), &ContainerId::Root).unwrap();
    o
}

#[derive(Default)]
struct RecordingSink {
    requests: Mutex<Vec<BTreeSet<EntityId>>>,
}

impl RecordingSink {
    fn take(&self) -> Vec<BTreeSet<EntityId>> {
        std::mem::take(&mut *self.requests.lock().unwrap())
    }
}

impl PushRequestSink for RecordingSink {
    fn request_push(&self, ids: BTreeSet<EntityId>) {
        self.requests.lock().unwrap().push(ids);
    }
}

// ── Structure ────────────────────────────────────────────────────

#[test]
fn append_builds_hierarchy() {
    let o = sample(false);
    assert_eq!(ids(&o), vec!["a", "d"]);
    assert_eq!(ids(o.row("a").unwrap()), vec!["b", "c"]);
    assert_eq!(o.parent_of("c"), Some(&ContainerId::row("a")));
    assert_eq!(o.parent_of("d"), Some(&ContainerId::Root));
    assert_eq!(o.level("b"), 1);
    assert_eq!(o.level("a"), 0);
    assert_eq!(o.row_total(), 4);
}

#[test]
fn insert_clamps_index() {
    let mut o = sample(false);
    o.insert_row(row("e"), &ContainerId::Root, 99).unwrap();
    o.insert_row(row("f"), &ContainerId::Root, 0).unwrap();
    assert_eq!(ids(&o), vec!["f", "a", "d", "e"]);
    assert_eq!(o.first_index(&ContainerId::Root, "e"), Some(3));
}

#[test]
fn remove_takes_subtree() {
    let mut o = sample(false);
    let removed = o.remove_row("a").unwrap();
    assert_eq!(removed, vec!["a", "b", "c"]);
    assert_eq!(ids(&o), vec!["d"]);
    assert!(o.row("b").is_none());
    assert!(o.parent_of("b").is_none());
    // Local outlines keep no tombstones.
    assert!(o.tombstone("a").is_none());
}

#[test]
fn move_reparents_row() {
    let mut o = sample(false);
    o.move_row("d", &ContainerId::row("b"), 0).unwrap();
    assert_eq!(ids(&o), vec!["a"]);
    assert_eq!(ids(o.row("b").unwrap()), vec!["d"]);
    assert_eq!(o.level("d"), 2);
    assert_eq!(o.ancestors("d"), vec!["b", "a"]);
}

#[test]
fn move_within_same_parent() {
    let mut o = sample(false);
    o.move_row("c", &ContainerId::row("a"), 0).unwrap();
    assert_eq!(ids(o.row("a").unwrap()), vec!["c", "b"]);
}

#[test]
fn descendants_are_depth_first() {
    let mut o = sample(false);
    o.append_row(row("e"), &ContainerId::row("b")).unwrap();
    assert_eq!(o.descendants("a"), vec!["b", "e", "c"]);
    assert!(o.descendants("d").is_empty());
}

#[test]
fn any_parent_complete() {
    let mut o = sample(false);
    assert!(!o.is_any_parent_complete("b"));
    o.complete("a").unwrap();
    assert!(o.is_any_parent_complete("b"));
    assert!(!o.is_any_parent_complete("a"));
    o.uncomplete("a").unwrap();
    assert!(!o.is_any_parent_complete("b"));
}

// ── Caller errors ────────────────────────────────────────────────

#[test]
fn move_under_own_descendant_is_rejected() {
    let mut o = sample(false);
    let err = o.move_row("a", &ContainerId::row("b"), 0).unwrap_err();
    assert_eq!(
        err,
        OutlineError::CyclicMove {
            row: "a".into(),
            parent: "b".into()
        }
    );
    assert!(matches!(
        o.move_row("a", &ContainerId::row("a"), 0),
        Err(OutlineError::CyclicMove { .. })
    ));
    assert_eq!(ids(&o), vec!["a", "d"]);
}

#[test]
fn foreign_and_duplicate_rows_are_rejected() {
    let mut o = sample(false);
    let foreign = Row::new(EntityId::Row(ACCOUNT, "other".into(), "x".into()));
    assert!(matches!(
        o.append_row(foreign, &ContainerId::Root),
        Err(OutlineError::ForeignEntity(_))
    ));
    assert_eq!(
        o.append_row(row("a"), &ContainerId::Root),
        Err(OutlineError::DuplicateRow("a".into()))
    );
    assert_eq!(
        o.append_row(row("z"), &ContainerId::row("missing")),
        Err(OutlineError::RowNotFound("missing".into()))
    );
    assert_eq!(
        o.remove_row("missing"),
        Err(OutlineError::RowNotFound("missing".into()))
    );
}

// ── Ancestor snapshots ───────────────────────────────────────────

#[test]
fn ancestor_is_snapshotted_once_per_round() {
    let mut o = sample(true);
    o.update_topic("b", Some(b"two".to_vec())).unwrap();
    o.update_topic("b", Some(b"three".to_vec())).unwrap();
    assert_eq!(o.row("b").unwrap().topic_text(), Some("three"));

    // The tombstone carries what the server last knew: the first value.
    o.remove_row("b").unwrap();
    let tombstone = o.tombstone("b").unwrap();
    let record = tombstone.record.as_row().unwrap();
    assert_eq!(record.topic_data.as_deref(), Some(&b"b"[..]));
    assert_eq!(tombstone.parent, ContainerId::row("a"));
    assert_eq!(tombstone.index, 0);
}

#[test]
fn local_outline_records_no_shadows() {
    let mut o = sample(false);
    o.update_topic("b", Some(b"two".to_vec())).unwrap();
    o.update_title(Some("Title".into()));
    o.add_tag("work");
    o.move_row("d", &ContainerId::row("a"), 0).unwrap();
    assert!(!o.has_shadows());
}

#[test]
fn remote_outline_tracks_container_order() {
    let o = sample(true);
    assert!(o.has_shadows());
    let record = o.build_record(&row_entity("a")).unwrap();
    let RecordBody::Row(body) = record.body else {
        panic!("row record expected");
    };
    assert_eq!(body.row_order, vec!["b", "c"]);
    assert!(body.sync_id.is_some());
}

// ── Ordering keys ────────────────────────────────────────────────

fn keys(o: &Outline, container: &ContainerId) -> Vec<String> {
    o.rows_in(container)
        .iter()
        .map(|r| r.order().unwrap_or_default().to_string())
        .collect()
}

#[test]
fn order_keys_follow_sibling_order() {
    let mut o = sample(false);
    o.insert_row(row("e"), &ContainerId::Root, 1).unwrap();
    o.insert_row(row("f"), &ContainerId::Root, 0).unwrap();
    let root_keys = keys(&o, &ContainerId::Root);
    assert_eq!(root_keys.len(), 4);
    assert!(root_keys.windows(2).all(|w| w[0] < w[1]), "{root_keys:?}");
}

#[test]
fn crowded_keys_are_rebalanced() {
    let mut o = Outline::new(doc()).with_rebalance_threshold(3);
    o.append_row(row("first"), &ContainerId::Root).unwrap();
    o.append_row(row("last"), &ContainerId::Root).unwrap();
    for i in 0..20 {
        o.insert_row(row(&format!("r{i}")), &ContainerId::Root, 1).unwrap();
    }
    let root_keys = keys(&o, &ContainerId::Root);
    assert!(root_keys.windows(2).all(|w| w[0] < w[1]), "{root_keys:?}");
    assert!(root_keys.iter().all(|k| k.len() <= 3), "{root_keys:?}");
}

// ── Batching ─────────────────────────────────────────────────────

#[test]
fn unbatched_mutation_flushes_immediately() {
    let sink = Arc::new(RecordingSink::default());
    let mut o = Outline::new(doc()).with_remote(true);
    o.attach_sink(sink.clone());

    o.append_row(row("a"), &ContainerId::Root).unwrap();
    let requests = sink.take();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0], BTreeSet::from([doc(), row_entity("a")]));
}

#[test]
fn nested_batches_flush_once() {
    let sink = Arc::new(RecordingSink::default());
    let mut o = Outline::new(doc()).with_remote(true);
    o.attach_sink(sink.clone());

    o.begin_batch();
    o.append_row(row("a"), &ContainerId::Root).unwrap();
    o.begin_batch();
    o.append_row(row("b"), &ContainerId::row("a")).unwrap();
    o.end_batch();
    assert!(sink.take().is_empty());
    assert_eq!(o.batch_depth(), 1);
    o.update_title(Some("T".into()));
    o.end_batch();

    let requests = sink.take();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0],
        BTreeSet::from([doc(), row_entity("a"), row_entity("b")])
    );
    assert!(o.pending_requests().is_empty());
}

#[test]
fn requests_wait_for_sink() {
    let mut o = Outline::new(doc()).with_remote(true);
    o.append_row(row("a"), &ContainerId::Root).unwrap();
    assert_eq!(o.pending_requests().len(), 2);

    let sink = Arc::new(RecordingSink::default());
    o.attach_sink(sink.clone());
    assert_eq!(sink.take().len(), 1);
    assert!(o.pending_requests().is_empty());
}

#[test]
fn local_outline_never_requests_push() {
    let sink = Arc::new(RecordingSink::default());
    let mut o = sample(false);
    o.attach_sink(sink.clone());
    o.update_topic("a", None).unwrap();
    o.remove_row("d").unwrap();
    assert!(sink.take().is_empty());
}

#[test]
fn remove_requests_row_and_container() {
    let sink = Arc::new(RecordingSink::default());
    let mut o = sample(true);
    o.attach_sink(sink.clone());
    assert_eq!(sink.take().len(), 1);
    o.remove_row("c").unwrap();
    let requests = sink.take();
    assert_eq!(requests, vec![BTreeSet::from([row_entity("a"), row_entity("c")])]);
}

// ── Integrity ────────────────────────────────────────────────────

fn row_record(id: &str, children: &[&str]) -> RemoteRecord {
    RemoteRecord::new(
        row_entity(id),
        RecordBody::Row(RowRecord {
            row_order: children.iter().map(|c| c.to_string()).collect(),
            topic_data: Some(id.as_bytes().to_vec()),
            ..RowRecord::default()
        }),
    )
}

#[test]
fn dangling_reference_is_repaired() {
    let mut o = sample(false);
    let result = o.apply_remote(&ChangeApplier::new(), &[row_record("d", &["gone"])], &[]);
    assert!(result.structural_change);
    assert!(result.corrupted);
    assert!(o.is_corrupted());

    let report = o.repair();
    assert_eq!(report.dangling, vec![(ContainerId::row("d"), "gone".to_string())]);
    assert!(!o.is_corrupted());
    assert!(o.row("d").unwrap().row_ids().is_empty());
}

#[test]
fn orphans_are_reattached_at_root() {
    let mut o = sample(true);
    o.apply_remote(
        &ChangeApplier::new(),
        &[row_record("x", &["y"]), row_record("y", &[])],
        &[],
    );
    let report = o.corruption_report();
    assert_eq!(report.orphans, vec!["x".to_string(), "y".to_string()]);

    o.repair();
    assert!(!o.is_corrupted());
    assert_eq!(ids(&o), vec!["a", "d", "x"]);
    assert_eq!(ids(o.row("x").unwrap()), vec!["y"]);
    assert_eq!(o.row_total(), 6);
}

#[test]
fn duplicate_listing_keeps_first_occurrence() {
    let mut o = sample(false);
    // d also claims b, which a already lists first.
    o.apply_remote(&ChangeApplier::new(), &[row_record("d", &["b"])], &[]);
    let report = o.corruption_report();
    assert_eq!(report.duplicates, vec![(ContainerId::row("d"), "b".to_string())]);

    o.repair();
    assert!(!o.is_corrupted());
    assert_eq!(ids(o.row("a").unwrap()), vec!["b", "c"]);
    assert!(o.row("d").unwrap().row_ids().is_empty());
    assert_eq!(o.parent_of("b"), Some(&ContainerId::row("a")));
}

#[test]
fn repair_of_clean_outline_is_noop() {
    let mut o = sample(true);
    let before = o.build_record(&doc());
    assert!(o.repair().is_clean());
    assert_eq!(o.build_record(&doc()), before);
}
