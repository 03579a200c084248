//! An in-memory remote database for testing.
//!
//! Behaves like a real zone store: change tags are assigned on every write,
//! saves honor [`SavePolicy`], requests over the record limit are refused,
//! and change tokens are positions in the zone's write log. Failures can be
//! queued with [`MemoryDatabase::fail_next`] or held back until some requests
//! have committed with [`MemoryDatabase::fail_modify_after`].

use crate::database::{
    ChangePage, ChangeToken, ModifyRequest, ModifyResponse, RemoteDatabase, SavePolicy, ZoneInfo,
};
use crate::error::RemoteError;
use async_trait::async_trait;
use outline_types::{ChangeTag, ChangeTokenKey, EntityId, RemoteRecord};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Default number of records one modify request may carry.
pub const DEFAULT_RECORD_LIMIT: usize = 400;

#[derive(Debug)]
struct Zone {
    info: ZoneInfo,
    records: BTreeMap<EntityId, RemoteRecord>,
    /// Ids in write order; a token is an offset into this log.
    log: Vec<EntityId>,
    /// Bumped to invalidate every token handed out before.
    epoch: u64,
}

impl Zone {
    fn new(info: ZoneInfo) -> Self {
        Self {
            info,
            records: BTreeMap::new(),
            log: Vec::new(),
            epoch: 0,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    zones: HashMap<ChangeTokenKey, Zone>,
    deleted_by_user: HashSet<ChangeTokenKey>,
    next_tag: u64,
    faults: VecDeque<RemoteError>,
    /// Fails the first modify once this many requests were accepted.
    modify_fault: Option<(usize, RemoteError)>,
    omit_page_tokens: bool,
    modify_calls: usize,
    fetch_calls: usize,
    largest_request: usize,
}

impl State {
    fn new_tag(&mut self) -> ChangeTag {
        self.next_tag += 1;
        ChangeTag::new(format!("tag-{}", self.next_tag))
    }

    fn zone(&mut self, key: &ChangeTokenKey) -> Result<&mut Zone, RemoteError> {
        if let Some(error) = self.faults.pop_front() {
            return Err(error);
        }
        if self.deleted_by_user.contains(key) {
            return Err(RemoteError::UserDeletedZone);
        }
        self.zones.get_mut(key).ok_or(RemoteError::ZoneNotFound)
    }
}

type CommitHook = Arc<dyn Fn() + Send + Sync>;

/// In-memory [`RemoteDatabase`].
pub struct MemoryDatabase {
    state: Mutex<State>,
    on_commit: Mutex<Option<CommitHook>>,
    record_limit: usize,
    page_size: usize,
}

impl fmt::Debug for MemoryDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDatabase")
            .field("state", &self.state)
            .field("record_limit", &self.record_limit)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_token(epoch: u64, position: usize) -> ChangeToken {
    let mut bytes = epoch.to_be_bytes().to_vec();
    bytes.extend_from_slice(&(position as u64).to_be_bytes());
    ChangeToken(bytes)
}

fn decode_token(token: &ChangeToken) -> Option<(u64, u64)> {
    let (epoch, position) = token.0.split_at_checked(8)?;
    let epoch: [u8; 8] = epoch.try_into().ok()?;
    let position: [u8; 8] = position.try_into().ok()?;
    Some((u64::from_be_bytes(epoch), u64::from_be_bytes(position)))
}

impl MemoryDatabase {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            on_commit: Mutex::new(None),
            record_limit: DEFAULT_RECORD_LIMIT,
            page_size: usize::MAX,
        }
    }

    /// Refuses modify requests with more than `limit` records.
    #[must_use]
    pub fn with_record_limit(mut self, limit: usize) -> Self {
        self.record_limit = limit.max(1);
        self
    }

    /// Returns at most `size` log entries per fetch.
    #[must_use]
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next call of any kind fail with `error`.
    pub fn fail_next(&self, error: RemoteError) {
        self.state().faults.push_back(error);
    }

    /// Makes the first modify request after `commits` accepted ones fail
    /// with `error`.
    pub fn fail_modify_after(&self, commits: usize, error: RemoteError) {
        self.state().modify_fault = Some((commits, error));
    }

    /// Runs `hook` after every accepted modify request.
    pub fn on_commit(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_commit.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(hook));
    }

    /// Serves pages without a change token.
    pub fn omit_page_tokens(&self) {
        self.state().omit_page_tokens = true;
    }

    /// Simulates the user deleting the zone from another device.
    pub fn delete_zone_by_user(&self, key: &ChangeTokenKey) {
        let mut state = self.state();
        state.zones.remove(key);
        state.deleted_by_user.insert(key.clone());
    }

    /// Invalidates every token handed out so far.
    pub fn expire_tokens(&self, key: &ChangeTokenKey) {
        if let Some(zone) = self.state().zones.get_mut(key) {
            zone.epoch += 1;
        }
    }

    /// Writes `record` as another client would, bypassing tag checks.
    ///
    /// Returns the stored record with its new change tag.
    pub fn put_record(&self, key: &ChangeTokenKey, mut record: RemoteRecord) -> Option<RemoteRecord> {
        let mut state = self.state();
        let tag = state.new_tag();
        let zone = state.zones.get_mut(key)?;
        record.change_tag = Some(tag);
        zone.log.push(record.id.clone());
        zone.records.insert(record.id.clone(), record.clone());
        Some(record)
    }

    #[must_use]
    pub fn record(&self, key: &ChangeTokenKey, id: &EntityId) -> Option<RemoteRecord> {
        self.state().zones.get(key)?.records.get(id).cloned()
    }

    #[must_use]
    pub fn record_count(&self, key: &ChangeTokenKey) -> usize {
        self.state().zones.get(key).map_or(0, |zone| zone.records.len())
    }

    /// Accepted modify requests.
    #[must_use]
    pub fn modify_calls(&self) -> usize {
        self.state().modify_calls
    }

    #[must_use]
    pub fn fetch_calls(&self) -> usize {
        self.state().fetch_calls
    }

    /// Size of the largest accepted modify request.
    #[must_use]
    pub fn largest_request(&self) -> usize {
        self.state().largest_request
    }
}

fn check_save(existing: Option<&RemoteRecord>, record: &RemoteRecord, policy: SavePolicy) -> Option<RemoteError> {
    if policy == SavePolicy::AllKeys {
        return None;
    }
    match (existing, &record.change_tag) {
        (None, None) => None,
        // Deleted on the server after we last saw it.
        (None, Some(_)) => Some(RemoteError::UnknownItem),
        (Some(server), tag) if server.change_tag.as_ref() == tag.as_ref() => None,
        (Some(server), _) => Some(RemoteError::ServerRecordChanged(Box::new(server.clone()))),
    }
}

#[async_trait]
impl RemoteDatabase for MemoryDatabase {
    async fn fetch_zone_changes(
        &self,
        key: &ChangeTokenKey,
        token: Option<&ChangeToken>,
    ) -> Result<ChangePage, RemoteError> {
        let page_size = self.page_size;
        let mut state = self.state();
        state.fetch_calls += 1;
        let omit_token = state.omit_page_tokens;
        let zone = state.zone(key)?;

        let since = match token {
            None => 0,
            Some(token) => match decode_token(token) {
                Some((epoch, position)) if epoch == zone.epoch => position,
                _ => return Err(RemoteError::ChangeTokenExpired),
            },
        };
        let start = usize::try_from(since).unwrap_or(usize::MAX).min(zone.log.len());
        let end = start.saturating_add(page_size).min(zone.log.len());

        let mut seen = BTreeSet::new();
        let mut page = ChangePage {
            token: (!omit_token).then(|| encode_token(zone.epoch, end)),
            more_coming: end < zone.log.len(),
            ..ChangePage::default()
        };
        for id in &zone.log[start..end] {
            if !seen.insert(id.clone()) {
                continue;
            }
            match zone.records.get(id) {
                Some(record) => page.updated.push(record.clone()),
                None => page.deleted.push(id.clone()),
            }
        }
        Ok(page)
    }

    async fn modify_records(
        &self,
        key: &ChangeTokenKey,
        request: ModifyRequest,
    ) -> Result<ModifyResponse, RemoteError> {
        let limit = self.record_limit;
        let mut state = self.state();
        let accepted = state.modify_calls;
        if state.modify_fault.as_ref().is_some_and(|(after, _)| accepted >= *after) {
            if let Some((_, error)) = state.modify_fault.take() {
                return Err(error);
            }
        }
        let zone = state.zone(key)?;
        if request.len() > limit {
            return Err(RemoteError::LimitExceeded);
        }

        let mut failures = Vec::new();
        for record in &request.saves {
            if let Some(error) = check_save(zone.records.get(&record.id), record, request.policy) {
                failures.push((record.id.clone(), error));
            }
        }
        for delete in &request.deletes {
            let server = zone.records.get(&delete.id);
            if let (Some(server), Some(expected)) = (server, &delete.expected_tag) {
                if server.change_tag.as_ref() != Some(expected) {
                    failures.push((
                        delete.id.clone(),
                        RemoteError::ServerRecordChanged(Box::new(server.clone())),
                    ));
                }
            }
        }
        if !failures.is_empty() {
            let failed: HashSet<EntityId> = failures.iter().map(|(id, _)| id.clone()).collect();
            let innocent = request
                .saves
                .iter()
                .map(|r| &r.id)
                .chain(request.deletes.iter().map(|d| &d.id))
                .filter(|id| !failed.contains(*id))
                .map(|id| (id.clone(), RemoteError::BatchRequestFailed));
            failures.extend(innocent.collect::<Vec<_>>());
            return Err(RemoteError::PartialFailure(failures));
        }

        let mut guard = state;
        let state = &mut *guard;
        let zone = state.zones.get_mut(key).ok_or(RemoteError::ZoneNotFound)?;
        let mut response = ModifyResponse::default();
        for mut record in request.saves {
            state.next_tag += 1;
            record.change_tag = Some(ChangeTag::new(format!("tag-{}", state.next_tag)));
            zone.log.push(record.id.clone());
            zone.records.insert(record.id.clone(), record.clone());
            response.saved.push(record);
        }
        for delete in request.deletes {
            if zone.records.remove(&delete.id).is_some() {
                zone.log.push(delete.id.clone());
            }
            response.deleted.push(delete.id);
        }
        state.modify_calls += 1;
        state.largest_request = state.largest_request.max(response.saved.len() + response.deleted.len());
        drop(guard);

        let hook = self.on_commit.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(hook) = hook {
            hook();
        }
        Ok(response)
    }

    async fn fetch_record(
        &self,
        key: &ChangeTokenKey,
        id: &EntityId,
    ) -> Result<Option<RemoteRecord>, RemoteError> {
        let mut state = self.state();
        Ok(state.zone(key)?.records.get(id).cloned())
    }

    async fn zone_info(&self, key: &ChangeTokenKey) -> Result<Option<ZoneInfo>, RemoteError> {
        let mut state = self.state();
        match state.zone(key) {
            Ok(zone) => Ok(Some(zone.info)),
            Err(RemoteError::ZoneNotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_zone(&self, key: &ChangeTokenKey, info: ZoneInfo) -> Result<(), RemoteError> {
        let mut state = self.state();
        if let Some(error) = state.faults.pop_front() {
            return Err(error);
        }
        state.deleted_by_user.remove(key);
        state.zones.entry(key.clone()).or_insert_with(|| Zone::new(info));
        Ok(())
    }

    async fn delete_zone(&self, key: &ChangeTokenKey) -> Result<(), RemoteError> {
        let mut state = self.state();
        if let Some(error) = state.faults.pop_front() {
            return Err(error);
        }
        state.zones.remove(key);
        Ok(())
    }
}
