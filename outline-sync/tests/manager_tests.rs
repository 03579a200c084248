use async_trait::async_trait;
use outline_model::{ContainerId, Outline, PushRequestSink, Row};
use outline_sync::mock::MemoryDatabase;
use outline_sync::{
    ChangeToken, ChangeTokenStore, DocumentStore, FileTokenStore, MemoryTokenStore, RequestQueue,
    RemoteError, SharedOutline, SyncConfig, SyncError, SyncManager, SyncResult,
};
use outline_types::{ChangeTokenKey, EntityId, RecordBody, RemoteRecord, RowRecord};
use pretty_assertions::assert_eq;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

// ── Helpers ──────────────────────────────────────────────────────

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn doc() -> EntityId {
    EntityId::Document(1, "plan".into())
}

fn row_entity(uuid: &str) -> EntityId {
    doc().row(uuid).unwrap()
}

fn zone() -> ChangeTokenKey {
    SyncConfig::default().zone_key()
}

/// The application's documents on one device.
struct Library {
    documents: Mutex<HashMap<EntityId, SharedOutline>>,
    tags: Mutex<BTreeSet<String>>,
    queue: Arc<RequestQueue>,
    refuse_new_documents: AtomicBool,
}

impl Library {
    fn new(queue: Arc<RequestQueue>) -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
            tags: Mutex::new(BTreeSet::new()),
            queue,
            refuse_new_documents: AtomicBool::new(false),
        }
    }

    fn insert(&self, mut outline: Outline) -> SharedOutline {
        outline.attach_sink(self.queue.clone());
        let id = outline.id().clone();
        let shared = Arc::new(AsyncMutex::new(outline));
        self.documents.lock().unwrap().insert(id, shared.clone());
        shared
    }

    fn get(&self, id: &EntityId) -> Option<SharedOutline> {
        self.documents.lock().unwrap().get(id).cloned()
    }

    fn remove(&self, id: &EntityId) {
        self.documents.lock().unwrap().remove(id);
    }
}

#[async_trait]
impl DocumentStore for Library {
    async fn find_document(&self, id: &EntityId) -> Option<SharedOutline> {
        self.get(id)
    }

    async fn create_document(&self, id: &EntityId) -> SyncResult<SharedOutline> {
        if self.refuse_new_documents.load(Ordering::SeqCst) {
            return Err(SyncError::Storage("disk full".into()));
        }
        Ok(self.insert(Outline::new(id.clone()).with_remote(true)))
    }

    async fn delete_document(&self, id: &EntityId) -> SyncResult<()> {
        self.remove(id);
        Ok(())
    }

    fn create_tag(&self, name: &str) {
        self.tags.lock().unwrap().insert(name.to_string());
    }
}

struct Device {
    library: Arc<Library>,
    tokens: Arc<MemoryTokenStore>,
    manager: SyncManager,
}

fn device(db: &Arc<MemoryDatabase>) -> Device {
    let queue = Arc::new(RequestQueue::new());
    let library = Arc::new(Library::new(queue.clone()));
    let tokens = Arc::new(MemoryTokenStore::new());
    let manager = SyncManager::with_queue(
        SyncConfig::default(),
        db.clone(),
        tokens.clone(),
        library.clone(),
        queue,
    );
    Device {
        library,
        tokens,
        manager,
    }
}

impl Device {
    fn outline(&self) -> SharedOutline {
        self.library.get(&doc()).expect("document present")
    }

    async fn root_topics(&self) -> Vec<String> {
        let shared = self.outline();
        let outline = shared.lock().await;
        outline
            .rows_in(&ContainerId::Root)
            .iter()
            .map(|row| row.topic_text().unwrap_or_default().to_string())
            .collect()
    }

    async fn topic(&self, uuid: &str) -> Option<String> {
        let shared = self.outline();
        let outline = shared.lock().await;
        outline
            .row(uuid)
            .and_then(|row| row.topic_text())
            .map(str::to_string)
    }
}

/// Two devices that both hold a synced document with row "one".
async fn two_synced_devices() -> (Arc<MemoryDatabase>, Device, Device) {
    init_tracing();
    let db = Arc::new(MemoryDatabase::new());
    let a = device(&db);
    let b = device(&db);

    let mut outline = Outline::new(doc()).with_remote(true).with_title("Plan");
    outline
        .append_row(Row::new(row_entity("one")).with_topic("one"), &ContainerId::Root)
        .unwrap();
    a.manager.request_full_upload(&outline);
    a.library.insert(outline);

    a.manager.sync().await.unwrap();
    b.manager.sync().await.unwrap();
    (db, a, b)
}

// ── Round trips ──────────────────────────────────────────────────

#[tokio::test]
async fn document_reaches_second_device() {
    let (db, a, b) = two_synced_devices().await;

    assert_eq!(b.root_topics().await, vec!["one"]);
    assert_eq!(b.outline().lock().await.title(), Some("Plan"));
    assert!(a.manager.requests().is_empty());
    assert!(db.record(&zone(), &doc()).is_some());
    assert!(db.record(&zone(), &row_entity("one")).is_some());
    assert!(b.tokens.load_token(&zone()).await.unwrap().is_some());
}

#[tokio::test]
async fn own_changes_come_back_as_echoes() {
    let (_db, a, _b) = two_synced_devices().await;

    let (_, fetched) = a.manager.sync().await.unwrap();
    assert!(fetched.changed_documents.is_empty());
    assert!(!a.outline().lock().await.has_shadows());
}

#[tokio::test]
async fn edits_flow_both_ways() {
    let (_db, a, b) = two_synced_devices().await;

    a.outline()
        .lock()
        .await
        .update_topic("one", Some(b"first edit".to_vec()))
        .unwrap();
    a.manager.sync().await.unwrap();
    let (_, fetched) = b.manager.sync().await.unwrap();
    assert_eq!(fetched.changed_documents, BTreeSet::from([doc()]));
    assert_eq!(b.topic("one").await.as_deref(), Some("first edit"));

    b.outline().lock().await.add_tag("work");
    b.manager.sync().await.unwrap();
    a.manager.sync().await.unwrap();
    assert_eq!(a.outline().lock().await.tag_names(), ["work".to_string()]);
    assert!(a.library.tags.lock().unwrap().contains("work"));
}

#[tokio::test]
async fn concurrent_appends_converge() {
    let (_db, a, b) = two_synced_devices().await;

    a.outline()
        .lock()
        .await
        .append_row(Row::new(row_entity("from-a")).with_topic("a"), &ContainerId::Root)
        .unwrap();
    b.outline()
        .lock()
        .await
        .append_row(Row::new(row_entity("from-b")).with_topic("b"), &ContainerId::Root)
        .unwrap();

    a.manager.sync().await.unwrap();
    b.manager.sync().await.unwrap();
    a.manager.sync().await.unwrap();

    let on_a = a.root_topics().await;
    let on_b = b.root_topics().await;
    assert_eq!(on_a, on_b);
    assert_eq!(on_a.len(), 3);
    assert_eq!(on_a[0], "one");
    let all: BTreeSet<String> = on_a.into_iter().collect();
    assert_eq!(all, BTreeSet::from(["one".to_string(), "a".to_string(), "b".to_string()]));
}

#[tokio::test]
async fn concurrent_edits_to_different_fields_both_survive() {
    let (_db, a, b) = two_synced_devices().await;

    a.outline()
        .lock()
        .await
        .update_topic("one", Some(b"topic from a".to_vec()))
        .unwrap();
    b.outline()
        .lock()
        .await
        .update_note("one", Some(b"note from b".to_vec()))
        .unwrap();

    a.manager.sync().await.unwrap();
    b.manager.sync().await.unwrap();
    a.manager.sync().await.unwrap();

    for device in [&a, &b] {
        let shared = device.outline();
        let outline = shared.lock().await;
        let row = outline.row("one").unwrap();
        assert_eq!(row.topic_text(), Some("topic from a"));
        assert_eq!(row.note(), Some(&b"note from b"[..]));
    }
}

// ── Deletes ──────────────────────────────────────────────────────

#[tokio::test]
async fn remote_edit_beats_local_delete() {
    let (db, a, b) = two_synced_devices().await;

    b.outline()
        .lock()
        .await
        .update_topic("one", Some(b"edited".to_vec()))
        .unwrap();
    b.manager.sync().await.unwrap();

    a.outline().lock().await.remove_row("one").unwrap();
    let (sent, _) = a.manager.sync().await.unwrap();

    assert_eq!(sent.restored, 1);
    assert_eq!(a.topic("one").await.as_deref(), Some("edited"));
    assert!(a.outline().lock().await.tombstone("one").is_none());
    assert!(db.record(&zone(), &row_entity("one")).is_some());

    // The restored placement is pushed on the next pass.
    a.manager.sync().await.unwrap();
    b.manager.sync().await.unwrap();
    assert!(a.root_topics().await.contains(&"edited".to_string()));
    assert_eq!(b.topic("one").await.as_deref(), Some("edited"));
}

#[tokio::test]
async fn delete_of_unchanged_row_is_retried_with_new_tag() {
    let (db, a, _b) = two_synced_devices().await;

    // Another client rewrites the row without changing it.
    let current = db.record(&zone(), &row_entity("one")).unwrap();
    db.put_record(&zone(), current).unwrap();

    a.outline().lock().await.remove_row("one").unwrap();
    let (sent, _) = a.manager.sync().await.unwrap();

    assert_eq!(sent.restored, 0);
    assert!(db.record(&zone(), &row_entity("one")).is_none());
    let shared = a.outline();
    let outline = shared.lock().await;
    assert!(outline.row("one").is_none());
    assert!(outline.tombstone("one").is_none());
}

#[tokio::test]
async fn remote_delete_removes_row() {
    let (_db, a, b) = two_synced_devices().await;

    a.outline().lock().await.remove_row("one").unwrap();
    a.manager.sync().await.unwrap();
    b.manager.sync().await.unwrap();

    assert!(b.root_topics().await.is_empty());
    assert!(b.outline().lock().await.row("one").is_none());
}

#[tokio::test]
async fn deleted_document_disappears_remotely() {
    let (db, a, b) = two_synced_devices().await;

    a.library.remove(&doc());
    a.manager.requests().enqueue([doc()]);
    a.manager.sync().await.unwrap();
    assert!(db.record(&zone(), &doc()).is_none());

    let (_, fetched) = b.manager.sync().await.unwrap();
    assert_eq!(fetched.deleted_documents, BTreeSet::from([doc()]));
    assert!(b.library.get(&doc()).is_none());
}

// ── Failures ─────────────────────────────────────────────────────

#[tokio::test]
async fn failed_fetch_keeps_previous_token() {
    init_tracing();
    let db = Arc::new(MemoryDatabase::new());
    let a = device(&db);
    let b = device(&db);
    let mut outline = Outline::new(doc()).with_remote(true);
    outline
        .append_row(Row::new(row_entity("one")).with_topic("one"), &ContainerId::Root)
        .unwrap();
    a.library.insert(outline);
    a.manager.sync().await.unwrap();

    b.library.refuse_new_documents.store(true, Ordering::SeqCst);
    let result = b.manager.sync().await;
    assert!(matches!(result, Err(SyncError::Storage(_))));
    assert_eq!(b.tokens.load_token(&zone()).await.unwrap(), None);

    b.library.refuse_new_documents.store(false, Ordering::SeqCst);
    b.manager.sync().await.unwrap();
    assert_eq!(b.root_topics().await, vec!["one"]);
}

#[tokio::test]
async fn user_deleted_zone_surfaces_and_keeps_requests() {
    let (db, a, _b) = two_synced_devices().await;
    a.outline()
        .lock()
        .await
        .update_topic("one", Some(b"offline".to_vec()))
        .unwrap();
    db.delete_zone_by_user(&zone());

    let result = a.manager.send_changes().await;
    assert!(matches!(result, Err(SyncError::UserDeletedZone)));
    assert!(a.manager.requests().contains(&row_entity("one")));

    a.manager.reset_after_zone_deleted(&[doc()]).await.unwrap();
    assert_eq!(a.tokens.load_token(&zone()).await.unwrap(), None);
    a.manager.sync().await.unwrap();

    let stored = db.record(&zone(), &row_entity("one")).unwrap();
    assert_eq!(stored.as_row().unwrap().topic_data.as_deref(), Some(&b"offline"[..]));
    assert!(db.record(&zone(), &doc()).is_some());
}

#[tokio::test]
async fn suspended_manager_keeps_requests() {
    let (_db, a, _b) = two_synced_devices().await;
    a.outline().lock().await.complete("one").unwrap();

    a.manager.suspend();
    let result = a.manager.send_changes().await;
    assert!(matches!(result, Err(SyncError::Suspended)));
    assert!(a.manager.requests().contains(&row_entity("one")));

    a.manager.resume();
    let sent = a.manager.send_changes().await.unwrap();
    assert_eq!(sent.saved, 1);
    assert!(a.manager.requests().is_empty());
}

/// A remote-backed document with `rows` top-level rows, queued for upload.
fn large_document(manager: &SyncManager, library: &Library, rows: usize) {
    let mut outline = Outline::new(doc()).with_remote(true).with_title("Plan");
    for n in 0..rows {
        let uuid = format!("r{n:03}");
        outline
            .append_row(Row::new(row_entity(&uuid)).with_topic(uuid.as_str()), &ContainerId::Root)
            .unwrap();
    }
    manager.request_full_upload(&outline);
    library.insert(outline);
}

/// Every record the server holds carries its new tag locally and left the
/// queue; everything else is still queued.
async fn assert_settled_against(db: &MemoryDatabase, library: &Library, requests: &RequestQueue) {
    let shared = library.get(&doc()).unwrap();
    let outline = shared.lock().await;
    for id in outline.all_entity_ids() {
        match db.record(&zone(), &id) {
            Some(server) => {
                let local = outline.build_record(&id).unwrap();
                assert_eq!(local.change_tag, server.change_tag, "tag of {id}");
                assert!(!requests.contains(&id), "{id} still queued");
            }
            None => assert!(requests.contains(&id), "{id} not queued"),
        }
    }
}

#[tokio::test]
async fn failure_after_a_committed_chunk_settles_it() {
    init_tracing();
    let db = Arc::new(MemoryDatabase::new().with_record_limit(250));
    let a = device(&db);
    large_document(&a.manager, &a.library, 300);
    db.fail_modify_after(1, RemoteError::Other("connection reset".into()));

    let result = a.manager.send_changes().await;
    assert!(matches!(result, Err(SyncError::Remote(RemoteError::Other(_)))));
    assert_eq!(db.record_count(&zone()), 200);
    assert_eq!(a.manager.requests().len(), 101);
    assert_settled_against(&db, &a.library, a.manager.requests()).await;

    let sent = a.manager.send_changes().await.unwrap();
    assert_eq!(sent.saved, 101);
    assert_eq!(sent.restored, 0);
    assert_eq!(db.record_count(&zone()), 301);
    assert!(a.manager.requests().is_empty());
}

#[tokio::test]
async fn suspend_between_chunks_settles_committed_chunk() {
    init_tracing();
    let db = Arc::new(MemoryDatabase::new().with_record_limit(250));
    let queue = Arc::new(RequestQueue::new());
    let library = Arc::new(Library::new(queue.clone()));
    let manager = Arc::new(SyncManager::with_queue(
        SyncConfig::default(),
        db.clone(),
        Arc::new(MemoryTokenStore::new()),
        library.clone(),
        queue.clone(),
    ));
    let weak = Arc::downgrade(&manager);
    db.on_commit(move || {
        if let Some(manager) = weak.upgrade() {
            manager.suspend();
        }
    });

    large_document(&manager, &library, 300);

    let result = manager.send_changes().await;
    assert!(matches!(result, Err(SyncError::Suspended)));
    assert_eq!(db.modify_calls(), 1);
    assert_eq!(queue.len(), 101);
    assert_settled_against(&db, &library, &queue).await;

    manager.resume();
    let sent = manager.send_changes().await.unwrap();
    assert_eq!(sent.saved, 101);
    assert_eq!(db.record_count(&zone()), 301);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn orphaned_rows_are_repaired_after_fetch() {
    let (db, a, _b) = two_synced_devices().await;

    // A row no container lists, as left behind by a partial upload.
    let stray = RemoteRecord::new(
        row_entity("stray"),
        RecordBody::Row(RowRecord {
            topic_data: Some(b"stray".to_vec()),
            ..RowRecord::default()
        }),
    );
    db.put_record(&zone(), stray).unwrap();

    let fetched = a.manager.fetch_changes().await.unwrap();
    assert_eq!(fetched.repaired_documents, BTreeSet::from([doc()]));
    assert_eq!(a.root_topics().await, vec!["one", "stray"]);
    assert!(!a.outline().lock().await.is_corrupted());
    // The repaired root order is queued for upload.
    assert!(a.manager.requests().contains(&doc()));
}

// ── Persistence ──────────────────────────────────────────────────

#[tokio::test]
async fn request_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("requests.json");
    let db = Arc::new(MemoryDatabase::new());
    let queue_config = SyncConfig {
        request_file: Some(path.clone()),
        ..SyncConfig::default()
    };

    let library = Arc::new(Library::new(Arc::new(RequestQueue::new())));
    let manager = SyncManager::open(
        queue_config.clone(),
        db.clone(),
        Arc::new(MemoryTokenStore::new()),
        library.clone(),
    )
    .await
    .unwrap();
    manager
        .push_sink()
        .request_push(BTreeSet::from([row_entity("one"), doc()]));
    manager.requests().persist().await.unwrap();
    drop(manager);

    let reopened = RequestQueue::open(&path).await.unwrap();
    assert_eq!(reopened.len(), 2);
    assert!(reopened.contains(&row_entity("one")));
    assert!(reopened.contains(&doc()));
}

#[tokio::test]
async fn file_token_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("tokens.json");
    let token = ChangeToken(vec![1, 2, 3]);

    let store = FileTokenStore::open(&path).await.unwrap();
    assert_eq!(store.load_token(&zone()).await.unwrap(), None);
    store.store_token(&zone(), &token).await.unwrap();

    let reopened = FileTokenStore::open(&path).await.unwrap();
    assert_eq!(reopened.load_token(&zone()).await.unwrap(), Some(token));
    reopened.delete_token(&zone()).await.unwrap();

    let again = FileTokenStore::open(&path).await.unwrap();
    assert_eq!(again.load_token(&zone()).await.unwrap(), None);
}
