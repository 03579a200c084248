//! Sync orchestration.
//!
//! The [`SyncManager`] owns the push queue and a [`ZoneClient`]. Sending
//! turns queued entity ids into records by asking their outlines; fetching
//! routes each page to the outlines it touches through a [`ChangeApplier`].
//! Outline locks are never held across a remote call.

use crate::database::{RecordDelete, RemoteDatabase};
use crate::error::SyncResult;
use crate::requests::RequestQueue;
use crate::retry::RetryPolicy;
use crate::token_store::ChangeTokenStore;
use crate::zone::{
    FetchSummary, ModifyFailure, RecordSource, ZoneChangeHandler, ZoneClient, DEFAULT_CHUNK_SIZE,
};
use async_trait::async_trait;
use outline_model::{ChangeApplier, DeleteResolution, Outline, PushRequestSink, TagRegistry};
use outline_types::{ChangeTokenKey, EntityId, RemoteRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// An outline shared between the application and the sync engine.
pub type SharedOutline = Arc<Mutex<Outline>>;

/// Configuration for the sync manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Name of the remote zone holding the documents.
    pub zone_name: String,
    /// Owner of the zone.
    pub owner_name: String,
    pub retry: RetryPolicy,
    /// Records per request once the server reports the request limit.
    pub chunk_size: usize,
    /// Where pending push requests survive restarts. Memory only when unset.
    pub request_file: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            zone_name: "Outlines".to_string(),
            owner_name: "_defaultOwner".to_string(),
            retry: RetryPolicy::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            request_file: None,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn zone_key(&self) -> ChangeTokenKey {
        ChangeTokenKey::new(self.zone_name.clone(), self.owner_name.clone())
    }
}

/// The application's document collection, as seen by the sync engine.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_document(&self, id: &EntityId) -> Option<SharedOutline>;

    /// Creates an empty remote-backed outline for a document first seen in
    /// a fetch.
    async fn create_document(&self, id: &EntityId) -> SyncResult<SharedOutline>;

    async fn delete_document(&self, id: &EntityId) -> SyncResult<()>;

    /// Registers a tag name seen on a fetched document.
    fn create_tag(&self, name: &str);
}

/// Result of pushing the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReport {
    pub saved: usize,
    pub deleted: usize,
    pub restored: usize,
    pub dropped: usize,
    /// Requests left in the queue for the next pass.
    pub requeued: usize,
}

/// Result of fetching the zone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub summary: FetchSummary,
    pub changed_documents: BTreeSet<EntityId>,
    pub deleted_documents: BTreeSet<EntityId>,
    /// Documents whose structure needed repair after the fetch.
    pub repaired_documents: BTreeSet<EntityId>,
}

struct StoreTags(Arc<dyn DocumentStore>);

impl TagRegistry for StoreTags {
    fn create_tag(&self, name: &str) {
        self.0.create_tag(name);
    }
}

/// Resolves push conflicts against the local outlines.
struct DocumentSource {
    documents: Arc<dyn DocumentStore>,
}

impl DocumentSource {
    async fn outline_of(&self, id: &EntityId) -> Option<SharedOutline> {
        self.documents.find_document(&id.document_id()?).await
    }
}

#[async_trait]
impl RecordSource for DocumentSource {
    async fn apply_conflict(&self, server: &RemoteRecord) -> Option<RemoteRecord> {
        let shared = self.outline_of(&server.id).await?;
        let mut outline = shared.lock().await;
        if !outline.apply_conflict(server) {
            return None;
        }
        outline.build_record(&server.id)
    }

    async fn resolve_delete_conflict(&self, server: &RemoteRecord) -> DeleteResolution {
        match self.outline_of(&server.id).await {
            Some(shared) => shared.lock().await.resolve_delete_conflict(server),
            None => DeleteResolution::Unknown,
        }
    }
}

/// Routes fetched pages to their outlines.
struct DocumentRouter<'a> {
    documents: &'a Arc<dyn DocumentStore>,
    applier: &'a ChangeApplier,
    changed: Mutex<BTreeSet<EntityId>>,
    deleted: Mutex<BTreeSet<EntityId>>,
    corrupted: Mutex<BTreeSet<EntityId>>,
}

#[async_trait]
impl ZoneChangeHandler for DocumentRouter<'_> {
    async fn apply_changes(&self, updated: Vec<RemoteRecord>, deleted: Vec<EntityId>) -> SyncResult<()> {
        let mut upserts: BTreeMap<EntityId, Vec<RemoteRecord>> = BTreeMap::new();
        let mut removals: BTreeMap<EntityId, Vec<EntityId>> = BTreeMap::new();

        for record in updated {
            match record.id.document_id() {
                Some(document) => upserts.entry(document).or_default().push(record),
                None => warn!(record = %record.id, "ignoring record outside any document"),
            }
        }
        for id in deleted {
            if matches!(id, EntityId::Document(..)) {
                self.documents.delete_document(&id).await?;
                upserts.remove(&id);
                removals.remove(&id);
                self.deleted.lock().await.insert(id);
            } else if let Some(document) = id.document_id() {
                removals.entry(document).or_default().push(id);
            }
        }

        let touched: BTreeSet<EntityId> = upserts.keys().chain(removals.keys()).cloned().collect();
        for document in touched {
            let records = upserts.remove(&document).unwrap_or_default();
            let deletes = removals.remove(&document).unwrap_or_default();
            let shared = match self.documents.find_document(&document).await {
                Some(shared) => shared,
                None if !records.is_empty() => {
                    debug!(document = %document, "creating document first seen remotely");
                    self.documents.create_document(&document).await?
                }
                None => continue,
            };

            let result = shared.lock().await.apply_remote(self.applier, &records, &deletes);
            if result.corrupted {
                self.corrupted.lock().await.insert(document.clone());
            }
            if !result.is_empty() {
                self.changed.lock().await.insert(document);
            }
        }
        Ok(())
    }
}

/// Pushes local edits and pulls remote ones for every document of a zone.
pub struct SyncManager {
    zone: ZoneClient,
    documents: Arc<dyn DocumentStore>,
    requests: Arc<RequestQueue>,
    applier: ChangeApplier,
}

impl SyncManager {
    /// Creates a manager whose queue is loaded from `config.request_file`.
    pub async fn open(
        config: SyncConfig,
        database: Arc<dyn RemoteDatabase>,
        tokens: Arc<dyn ChangeTokenStore>,
        documents: Arc<dyn DocumentStore>,
    ) -> SyncResult<Self> {
        let requests = match &config.request_file {
            Some(path) => RequestQueue::open(path).await?,
            None => RequestQueue::new(),
        };
        Ok(Self::with_queue(config, database, tokens, documents, Arc::new(requests)))
    }

    /// Creates a manager around an existing queue.
    pub fn with_queue(
        config: SyncConfig,
        database: Arc<dyn RemoteDatabase>,
        tokens: Arc<dyn ChangeTokenStore>,
        documents: Arc<dyn DocumentStore>,
        requests: Arc<RequestQueue>,
    ) -> Self {
        let zone = ZoneClient::new(config.zone_key(), database, tokens)
            .with_retry_policy(config.retry)
            .with_chunk_size(config.chunk_size);
        let applier = ChangeApplier::new().with_tag_registry(Arc::new(StoreTags(documents.clone())));
        Self {
            zone,
            documents,
            requests,
            applier,
        }
    }

    pub fn zone(&self) -> &ZoneClient {
        &self.zone
    }

    pub fn requests(&self) -> &RequestQueue {
        &self.requests
    }

    /// The sink outlines should be attached to.
    pub fn push_sink(&self) -> Arc<dyn PushRequestSink> {
        self.requests.clone()
    }

    /// Queues every entity of `outline`, as for a first upload.
    pub fn request_full_upload(&self, outline: &Outline) {
        self.requests.enqueue(outline.all_entity_ids());
    }

    pub fn suspend(&self) {
        self.zone.suspend();
    }

    pub fn resume(&self) {
        self.zone.resume();
    }

    /// Sends pending edits, then fetches remote ones.
    pub async fn sync(&self) -> SyncResult<(SendReport, FetchReport)> {
        self.zone.verify_zone().await?;
        let sent = self.send_changes().await?;
        let fetched = self.fetch_changes().await?;
        Ok((sent, fetched))
    }

    /// Pushes every queued request.
    ///
    /// Requests that fail are queued again. When the push stops early, the
    /// records the server already committed are settled and only the rest
    /// is queued again before the error is returned.
    pub async fn send_changes(&self) -> SyncResult<SendReport> {
        let ids = self.requests.drain();
        if ids.is_empty() {
            return Ok(SendReport::default());
        }

        let mut by_document: BTreeMap<EntityId, Vec<EntityId>> = BTreeMap::new();
        for id in &ids {
            match id.document_id() {
                Some(document) => by_document.entry(document).or_default().push(id.clone()),
                None => warn!(id = %id, "dropping push request outside any document"),
            }
        }

        let mut saves = Vec::new();
        let mut deletes = Vec::new();
        for (document, members) in &by_document {
            let Some(shared) = self.documents.find_document(document).await else {
                deletes.extend(members.iter().map(|id| RecordDelete::new(id.clone(), None)));
                continue;
            };
            let outline = shared.lock().await;
            for id in members {
                match outline.build_record(id) {
                    Some(record) => saves.push(record),
                    None => deletes.push(RecordDelete::new(id.clone(), outline.delete_change_tag(id))),
                }
            }
        }
        debug!(saves = saves.len(), deletes = deletes.len(), "sending changes");

        let source = DocumentSource {
            documents: self.documents.clone(),
        };
        let (outcome, failure) = match self.zone.modify(saves, deletes, &source).await {
            Ok(outcome) => (outcome, None),
            Err(ModifyFailure { outcome, error }) => (outcome, Some(error)),
        };

        for record in &outcome.saved {
            if let Some(shared) = self.outline_of(&record.id).await {
                shared.lock().await.update_sync_metadata(record);
            }
        }
        for id in &outcome.deleted {
            if let Some(shared) = self.outline_of(id).await {
                shared.lock().await.confirm_delete(id);
            }
        }

        if let Some(error) = failure {
            let settled: HashSet<&EntityId> = outcome.settled_ids().collect();
            let unsettled: Vec<EntityId> = ids.iter().filter(|id| !settled.contains(id)).cloned().collect();
            warn!(
                %error,
                committed = settled.len(),
                requeued = unsettled.len(),
                "send interrupted, requeueing the rest"
            );
            self.requests.enqueue(unsettled);
            self.requests.persist().await?;
            return Err(error);
        }

        let report = SendReport {
            saved: outcome.saved.len(),
            deleted: outcome.deleted.len(),
            restored: outcome.restored.len(),
            dropped: outcome.dropped.len(),
            requeued: outcome.unresolved.len(),
        };
        self.requests.enqueue(outcome.unresolved);
        self.requests.persist().await?;
        info!(
            saved = report.saved,
            deleted = report.deleted,
            restored = report.restored,
            requeued = report.requeued,
            "changes sent"
        );
        Ok(report)
    }

    /// Fetches remote changes and applies them.
    ///
    /// Structural damage seen while pages arrive is repaired only after the
    /// last page, since a row's parent may come in a later page.
    pub async fn fetch_changes(&self) -> SyncResult<FetchReport> {
        let router = DocumentRouter {
            documents: &self.documents,
            applier: &self.applier,
            changed: Mutex::default(),
            deleted: Mutex::default(),
            corrupted: Mutex::default(),
        };
        let summary = self.zone.fetch_changes(&router).await?;

        let mut report = FetchReport {
            summary,
            changed_documents: router.changed.into_inner(),
            deleted_documents: router.deleted.into_inner(),
            repaired_documents: BTreeSet::new(),
        };
        for document in router.corrupted.into_inner() {
            let Some(shared) = self.documents.find_document(&document).await else {
                continue;
            };
            let mut outline = shared.lock().await;
            if outline.is_corrupted() {
                let repaired = outline.repair();
                warn!(document = %document, ?repaired, "repaired document structure");
                report.repaired_documents.insert(document);
            }
        }
        // Repairs and restored rows queue pushes of their own.
        self.requests.persist().await?;
        info!(
            pages = report.summary.pages,
            changed = report.changed_documents.len(),
            deleted = report.deleted_documents.len(),
            repaired = report.repaired_documents.len(),
            "changes fetched"
        );
        Ok(report)
    }

    async fn outline_of(&self, id: &EntityId) -> Option<SharedOutline> {
        self.documents.find_document(&id.document_id()?).await
    }

    /// Starts over after the user deleted the zone: recreates it, forgets
    /// the change token and every sync shadow, and queues a full upload of
    /// the listed documents.
    pub async fn reset_after_zone_deleted(&self, documents: &[EntityId]) -> SyncResult<()> {
        self.zone.delete_zone().await?;
        self.zone.create_zone().await?;
        for id in documents {
            let Some(shared) = self.documents.find_document(id).await else {
                continue;
            };
            let mut outline = shared.lock().await;
            outline.clear_sync_data();
            self.requests.enqueue(outline.all_entity_ids());
        }
        self.requests.persist().await?;
        info!(documents = documents.len(), "sync data reset for re-upload");
        Ok(())
    }
}

impl PushRequestSink for SyncManager {
    fn request_push(&self, ids: BTreeSet<EntityId>) {
        self.requests.enqueue(ids);
    }
}
