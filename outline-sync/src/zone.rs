//! Client for one remote record zone.
//!
//! Every operation runs as an explicit loop over a step enum. Transient
//! failures wait and retry, a missing zone is created once, oversized
//! requests are split, and rejected records are settled one by one through
//! a [`RecordSource`]. A shared liveness flag is checked before every
//! network call and after every wait, so [`ZoneClient::suspend`] stops an
//! operation at the next boundary.

use crate::database::{ChangeToken, ModifyRequest, RecordDelete, RemoteDatabase, SavePolicy, ZoneInfo};
use crate::error::{RemoteError, SyncError, SyncResult};
use crate::outcome::ZoneOutcome;
use crate::retry::{Backoff, RetryPolicy};
use crate::token_store::ChangeTokenStore;
use async_trait::async_trait;
use outline_model::DeleteResolution;
use outline_types::{ChangeTokenKey, EntityId, RemoteRecord};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Schema version written into new zones.
pub const ZONE_VERSION: u32 = 2;

/// Records per modify request after the server reported the limit.
pub const DEFAULT_CHUNK_SIZE: usize = 200;

/// Receives fetched changes one page at a time.
#[async_trait]
pub trait ZoneChangeHandler: Send + Sync {
    /// Applies one page. An error stops the fetch before the page's token
    /// is stored.
    async fn apply_changes(&self, updated: Vec<RemoteRecord>, deleted: Vec<EntityId>) -> SyncResult<()>;
}

/// Local side of a push, consulted when the server rejects records.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Merges `server` into the local entity and returns the record to
    /// retry, or `None` when the entity is gone.
    async fn apply_conflict(&self, server: &RemoteRecord) -> Option<RemoteRecord>;

    /// Settles a delete rejected because `server` is newer than what was
    /// deleted locally.
    async fn resolve_delete_conflict(&self, server: &RemoteRecord) -> DeleteResolution;
}

/// Summary of a fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub pages: usize,
    pub updated: usize,
    pub deleted: usize,
    /// The stored token was rejected and the zone was read from scratch.
    pub restarted: bool,
}

/// What a modify committed and what it could not.
#[derive(Debug, Clone, Default)]
pub struct ModifyOutcome {
    /// Records the server accepted, carrying their new change tags.
    pub saved: Vec<RemoteRecord>,
    /// Deletes the server confirmed, including records already gone.
    pub deleted: Vec<EntityId>,
    /// Deletes abandoned because a newer remote edit restored the row.
    pub restored: Vec<EntityId>,
    /// Records dropped because the server no longer knows them.
    pub dropped: Vec<EntityId>,
    /// Records that failed and should be pushed again later.
    pub unresolved: Vec<EntityId>,
}

impl ModifyOutcome {
    /// Ids whose push is finished, one way or another.
    pub fn settled_ids(&self) -> impl Iterator<Item = &EntityId> {
        self.saved
            .iter()
            .map(|r| &r.id)
            .chain(&self.deleted)
            .chain(&self.restored)
            .chain(&self.dropped)
    }
}

/// A modify that stopped early.
///
/// `outcome` holds what the server committed before `error`; those records
/// must be settled like a successful push.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct ModifyFailure {
    pub outcome: ModifyOutcome,
    #[source]
    pub error: SyncError,
}

#[derive(Debug, Clone, Default)]
struct Batch {
    saves: Vec<RemoteRecord>,
    deletes: Vec<RecordDelete>,
    attempts: u32,
}

impl Batch {
    fn len(&self) -> usize {
        self.saves.len() + self.deletes.len()
    }

    fn is_empty(&self) -> bool {
        self.saves.is_empty() && self.deletes.is_empty()
    }

    fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.saves
            .iter()
            .map(|r| r.id.clone())
            .chain(self.deletes.iter().map(|d| d.id.clone()))
    }

    /// Saves first, then deletes, `size` records per part.
    fn split(self, size: usize) -> Vec<Batch> {
        let size = size.max(1);
        let saves = self.saves.chunks(size).map(|chunk| Batch {
            saves: chunk.to_vec(),
            ..Batch::default()
        });
        let deletes = self.deletes.chunks(size).map(|chunk| Batch {
            deletes: chunk.to_vec(),
            ..Batch::default()
        });
        saves.chain(deletes).collect()
    }
}

enum FetchStep {
    Fetch,
    Restart,
    CreateZone,
}

enum ModifyStep {
    Send(Batch),
    CreateZone(Batch),
    Split(Batch),
    Settle(Batch, Vec<(EntityId, RemoteError)>),
}

/// Client bound to one zone.
pub struct ZoneClient {
    key: ChangeTokenKey,
    database: Arc<dyn RemoteDatabase>,
    tokens: Arc<dyn ChangeTokenStore>,
    policy: RetryPolicy,
    chunk_size: usize,
    alive: Arc<AtomicBool>,
}

impl ZoneClient {
    pub fn new(key: ChangeTokenKey, database: Arc<dyn RemoteDatabase>, tokens: Arc<dyn ChangeTokenStore>) -> Self {
        Self {
            key,
            database,
            tokens,
            policy: RetryPolicy::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    pub fn key(&self) -> &ChangeTokenKey {
        &self.key
    }

    /// Stops running operations at their next network call or timer.
    pub fn suspend(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            info!(zone = %self.key, "zone client suspended");
        }
    }

    pub fn resume(&self) {
        self.alive.store(true, Ordering::SeqCst);
    }

    pub fn is_suspended(&self) -> bool {
        !self.alive.load(Ordering::SeqCst)
    }

    fn check_alive(&self) -> SyncResult<()> {
        if self.is_suspended() {
            return Err(SyncError::Suspended);
        }
        Ok(())
    }

    async fn back_off(
        &self,
        backoff: &mut Backoff,
        attempts: &mut u32,
        after: Option<Duration>,
        unbounded: bool,
        error: RemoteError,
    ) -> SyncResult<()> {
        *attempts += 1;
        if !self.policy.allows(*attempts, unbounded) {
            return Err(SyncError::RetriesExhausted {
                attempts: *attempts,
                last: error,
            });
        }
        let delay = backoff.delay_for(after);
        warn!(zone = %self.key, %error, attempt = *attempts, ?delay, "retrying remote call");
        tokio::time::sleep(delay).await;
        self.check_alive()
    }

    /// Runs a single remote call, retrying transient failures.
    async fn call<T, F, Fut>(&self, mut op: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut backoff = Backoff::new(self.policy);
        let mut attempts = 0;
        loop {
            self.check_alive()?;
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            match ZoneOutcome::refine(error.clone()) {
                ZoneOutcome::Retry { after, unbounded } => {
                    self.back_off(&mut backoff, &mut attempts, after, unbounded, error)
                        .await?;
                }
                ZoneOutcome::UserDeletedZone => return Err(SyncError::UserDeletedZone),
                _ => return Err(SyncError::Remote(error)),
            }
        }
    }

    // ── Zone management ──────────────────────────────────────────

    /// Creates the zone at the current schema version. Idempotent.
    pub async fn create_zone(&self) -> SyncResult<()> {
        let (database, key) = (&self.database, &self.key);
        let info = ZoneInfo { version: ZONE_VERSION };
        self.call(move || database.create_zone(key, info)).await?;
        info!(zone = %self.key, version = ZONE_VERSION, "zone created");
        Ok(())
    }

    /// Deletes the zone and forgets its change token.
    pub async fn delete_zone(&self) -> SyncResult<()> {
        let (database, key) = (&self.database, &self.key);
        match self.call(move || database.delete_zone(key)).await {
            Ok(()) | Err(SyncError::Remote(RemoteError::ZoneNotFound)) => {}
            Err(e) => return Err(e),
        }
        self.tokens.delete_token(&self.key).await?;
        info!(zone = %self.key, "zone deleted");
        Ok(())
    }

    /// Creates the zone when missing and rejects zones written by another
    /// schema version.
    pub async fn verify_zone(&self) -> SyncResult<()> {
        let (database, key) = (&self.database, &self.key);
        match self.call(move || database.zone_info(key)).await? {
            None => self.create_zone().await,
            Some(info) if info.version != ZONE_VERSION => Err(SyncError::IncompatibleVersion {
                found: info.version,
                expected: ZONE_VERSION,
            }),
            Some(_) => Ok(()),
        }
    }

    /// Fetches the current server copy of one record.
    pub async fn fetch_record(&self, id: &EntityId) -> SyncResult<Option<RemoteRecord>> {
        let (database, key) = (&self.database, &self.key);
        match self.call(move || database.fetch_record(key, id)).await {
            Err(SyncError::Remote(RemoteError::ZoneNotFound)) => Ok(None),
            other => other,
        }
    }

    // ── Fetch ────────────────────────────────────────────────────

    /// Fetches every change since the stored token, page by page.
    ///
    /// Each page's token is stored only after `handler` accepted the page,
    /// so an interrupted fetch resumes at the first unapplied page.
    pub async fn fetch_changes(&self, handler: &dyn ZoneChangeHandler) -> SyncResult<FetchSummary> {
        let mut token: Option<ChangeToken> = self.tokens.load_token(&self.key).await?;
        let mut summary = FetchSummary::default();
        let mut backoff = Backoff::new(self.policy);
        let mut attempts = 0;
        let mut zone_created = false;
        let mut step = FetchStep::Fetch;

        loop {
            step = match step {
                FetchStep::Fetch => {
                    self.check_alive()?;
                    match self.database.fetch_zone_changes(&self.key, token.as_ref()).await {
                        Ok(page) => {
                            attempts = 0;
                            backoff.reset();
                            summary.pages += 1;
                            summary.updated += page.updated.len();
                            summary.deleted += page.deleted.len();
                            debug!(
                                zone = %self.key,
                                updated = page.updated.len(),
                                deleted = page.deleted.len(),
                                more = page.more_coming,
                                "fetched page"
                            );
                            handler.apply_changes(page.updated, page.deleted).await?;
                            let advanced = page.token.is_some() && page.token != token;
                            if let Some(next) = page.token {
                                self.tokens.store_token(&self.key, &next).await?;
                                token = Some(next);
                            }
                            if !page.more_coming {
                                return Ok(summary);
                            }
                            if !advanced {
                                warn!(zone = %self.key, "more changes announced without a new token");
                                return Err(SyncError::Protocol(
                                    "change token did not advance".to_string(),
                                ));
                            }
                            FetchStep::Fetch
                        }
                        Err(error) => match ZoneOutcome::refine(error.clone()) {
                            ZoneOutcome::Retry { after, unbounded } => {
                                self.back_off(&mut backoff, &mut attempts, after, unbounded, error)
                                    .await?;
                                FetchStep::Fetch
                            }
                            ZoneOutcome::ChangeTokenExpired if token.is_some() => FetchStep::Restart,
                            ZoneOutcome::ZoneNotFound if !zone_created => FetchStep::CreateZone,
                            ZoneOutcome::UserDeletedZone => return Err(SyncError::UserDeletedZone),
                            _ => return Err(SyncError::Remote(error)),
                        },
                    }
                }
                FetchStep::Restart => {
                    warn!(zone = %self.key, "change token expired, fetching from scratch");
                    self.tokens.delete_token(&self.key).await?;
                    token = None;
                    summary.restarted = true;
                    FetchStep::Fetch
                }
                FetchStep::CreateZone => {
                    self.create_zone().await?;
                    zone_created = true;
                    FetchStep::Fetch
                }
            };
        }
    }

    // ── Modify ───────────────────────────────────────────────────

    /// Pushes saves and deletes.
    ///
    /// Saves are conditional on the server copy being the one the record was
    /// built from. Rejected records are merged through `source` and retried;
    /// everything that cannot be settled is reported back, not dropped.
    /// When a later request fails, the chunks already committed travel
    /// back in the [`ModifyFailure`].
    pub async fn modify(
        &self,
        saves: Vec<RemoteRecord>,
        deletes: Vec<RecordDelete>,
        source: &dyn RecordSource,
    ) -> Result<ModifyOutcome, ModifyFailure> {
        let mut outcome = ModifyOutcome::default();
        let result = self.modify_into(saves, deletes, source, &mut outcome).await;
        info!(
            zone = %self.key,
            saved = outcome.saved.len(),
            deleted = outcome.deleted.len(),
            restored = outcome.restored.len(),
            unresolved = outcome.unresolved.len(),
            failed = result.is_err(),
            "modify finished"
        );
        match result {
            Ok(()) => Ok(outcome),
            Err(error) => Err(ModifyFailure { outcome, error }),
        }
    }

    async fn modify_into(
        &self,
        saves: Vec<RemoteRecord>,
        deletes: Vec<RecordDelete>,
        source: &dyn RecordSource,
        outcome: &mut ModifyOutcome,
    ) -> SyncResult<()> {
        let mut pending = VecDeque::from([Batch {
            saves,
            deletes,
            attempts: 0,
        }]);
        let mut backoff = Backoff::new(self.policy);
        let mut zone_created = false;

        while let Some(batch) = pending.pop_front() {
            let mut step = ModifyStep::Send(batch);
            loop {
                step = match step {
                    ModifyStep::Send(mut batch) => {
                        if batch.is_empty() {
                            break;
                        }
                        self.check_alive()?;
                        let request = ModifyRequest {
                            saves: batch.saves.clone(),
                            deletes: batch.deletes.clone(),
                            policy: SavePolicy::IfServerUnchanged,
                        };
                        let error = match self.database.modify_records(&self.key, request).await {
                            Ok(response) => {
                                debug!(
                                    zone = %self.key,
                                    saved = response.saved.len(),
                                    deleted = response.deleted.len(),
                                    "modify committed"
                                );
                                backoff.reset();
                                outcome.saved.extend(response.saved);
                                outcome.deleted.extend(response.deleted);
                                break;
                            }
                            Err(error) => error,
                        };
                        match ZoneOutcome::refine(error.clone()) {
                            ZoneOutcome::Retry { after, unbounded } => {
                                self.back_off(&mut backoff, &mut batch.attempts, after, unbounded, error)
                                    .await?;
                                ModifyStep::Send(batch)
                            }
                            ZoneOutcome::ZoneNotFound if !zone_created => ModifyStep::CreateZone(batch),
                            ZoneOutcome::UserDeletedZone => return Err(SyncError::UserDeletedZone),
                            ZoneOutcome::LimitExceeded => ModifyStep::Split(batch),
                            ZoneOutcome::PerRecord(items) => ModifyStep::Settle(batch, items),
                            _ => return Err(SyncError::Remote(error)),
                        }
                    }
                    ModifyStep::CreateZone(batch) => {
                        self.create_zone().await?;
                        zone_created = true;
                        ModifyStep::Send(batch)
                    }
                    ModifyStep::Split(batch) => {
                        if batch.len() <= 1 {
                            warn!(zone = %self.key, "single record exceeds request limit");
                            outcome.unresolved.extend(batch.ids());
                            break;
                        }
                        let size = if batch.len() > self.chunk_size {
                            self.chunk_size
                        } else {
                            batch.len().div_ceil(2)
                        };
                        let parts = batch.split(size);
                        debug!(zone = %self.key, parts = parts.len(), size, "splitting request");
                        for part in parts.into_iter().rev() {
                            pending.push_front(part);
                        }
                        break;
                    }
                    ModifyStep::Settle(batch, items) => {
                        match self.settle(batch, items, source, outcome).await {
                            Some(retry) => ModifyStep::Send(retry),
                            None => break,
                        }
                    }
                };
            }
        }

        Ok(())
    }

    /// Decides per record what to do after an atomic request failed.
    ///
    /// Returns the batch to retry, if anything is left.
    async fn settle(
        &self,
        batch: Batch,
        items: Vec<(EntityId, RemoteError)>,
        source: &dyn RecordSource,
        outcome: &mut ModifyOutcome,
    ) -> Option<Batch> {
        let errors: HashMap<EntityId, RemoteError> = items.into_iter().collect();
        let mut retry = Batch {
            attempts: batch.attempts + 1,
            ..Batch::default()
        };

        for record in batch.saves {
            match errors.get(&record.id) {
                None | Some(RemoteError::BatchRequestFailed) => retry.saves.push(record),
                Some(RemoteError::ServerRecordChanged(server)) => match source.apply_conflict(server).await {
                    Some(merged) => retry.saves.push(merged),
                    None => {
                        debug!(record = %record.id, "conflicting record is gone locally");
                        outcome.dropped.push(record.id);
                    }
                },
                Some(RemoteError::UnknownItem) => {
                    debug!(record = %record.id, "server no longer knows record, dropping");
                    outcome.dropped.push(record.id);
                }
                Some(error) => {
                    warn!(record = %record.id, %error, "save failed");
                    outcome.unresolved.push(record.id);
                }
            }
        }

        for delete in batch.deletes {
            match errors.get(&delete.id) {
                None | Some(RemoteError::BatchRequestFailed) => retry.deletes.push(delete),
                Some(RemoteError::ServerRecordChanged(server)) => {
                    match source.resolve_delete_conflict(server).await {
                        DeleteResolution::RetryDelete(tag) => {
                            retry.deletes.push(RecordDelete::new(delete.id, Some(tag)));
                        }
                        DeleteResolution::Restored => outcome.restored.push(delete.id),
                        // No local content to restore; the delete stands.
                        DeleteResolution::Unknown => {
                            retry.deletes.push(RecordDelete::new(delete.id, server.change_tag.clone()));
                        }
                    }
                }
                Some(RemoteError::UnknownItem) => outcome.deleted.push(delete.id),
                Some(error) => {
                    warn!(record = %delete.id, %error, "delete failed");
                    outcome.unresolved.push(delete.id);
                }
            }
        }

        if retry.is_empty() {
            return None;
        }
        if !self.policy.allows(retry.attempts, false) {
            warn!(zone = %self.key, records = retry.len(), "giving up on conflicting records");
            outcome.unresolved.extend(retry.ids());
            return None;
        }
        Some(retry)
    }
}
