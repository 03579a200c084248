//! Queue of entities waiting to be pushed.

use crate::error::{SyncError, SyncResult};
use outline_model::PushRequestSink;
use outline_types::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// One entity to push, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    pub id: EntityId,
}

/// Deduplicated set of pending push requests.
///
/// Outlines enqueue through [`PushRequestSink`], which cannot block on I/O;
/// the file copy is refreshed by [`RequestQueue::persist`].
#[derive(Debug, Default)]
pub struct RequestQueue {
    pending: Mutex<BTreeSet<EntityId>>,
    path: Option<PathBuf>,
}

impl RequestQueue {
    /// A queue that lives only in memory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue backed by a JSON file, loaded when it exists.
    pub async fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        let pending = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let requests: Vec<PushRequest> = serde_json::from_slice(&bytes)?;
                requests.into_iter().map(|r| r.id).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => return Err(SyncError::Io(e)),
        };
        Ok(Self {
            pending: Mutex::new(pending),
            path: Some(path),
        })
    }

    fn pending(&self) -> MutexGuard<'_, BTreeSet<EntityId>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enqueue(&self, ids: impl IntoIterator<Item = EntityId>) {
        self.pending().extend(ids);
    }

    /// Takes every pending request.
    pub fn drain(&self) -> BTreeSet<EntityId> {
        std::mem::take(&mut *self.pending())
    }

    #[must_use]
    pub fn contains(&self, id: &EntityId) -> bool {
        self.pending().contains(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending().is_empty()
    }

    /// Writes the pending set to the backing file, if any.
    pub async fn persist(&self) -> SyncResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let requests: Vec<PushRequest> = self
            .pending()
            .iter()
            .map(|id| PushRequest { id: id.clone() })
            .collect();
        let bytes = serde_json::to_vec_pretty(&requests)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), count = requests.len(), "persisted push requests");
        Ok(())
    }
}

impl PushRequestSink for RequestQueue {
    fn request_push(&self, ids: BTreeSet<EntityId>) {
        self.enqueue(ids);
    }
}
