//! Persistence of zone change tokens.

use crate::database::ChangeToken;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use outline_types::ChangeTokenKey;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// Stores the last fully applied change token per zone.
#[async_trait]
pub trait ChangeTokenStore: Send + Sync {
    async fn store_token(&self, key: &ChangeTokenKey, token: &ChangeToken) -> SyncResult<()>;
    async fn load_token(&self, key: &ChangeTokenKey) -> SyncResult<Option<ChangeToken>>;
    async fn delete_token(&self, key: &ChangeTokenKey) -> SyncResult<()>;
}

/// In-memory token store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<HashMap<ChangeTokenKey, ChangeToken>>,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChangeTokenStore for MemoryTokenStore {
    async fn store_token(&self, key: &ChangeTokenKey, token: &ChangeToken) -> SyncResult<()> {
        self.tokens.write().await.insert(key.clone(), token.clone());
        Ok(())
    }

    async fn load_token(&self, key: &ChangeTokenKey) -> SyncResult<Option<ChangeToken>> {
        Ok(self.tokens.read().await.get(key).cloned())
    }

    async fn delete_token(&self, key: &ChangeTokenKey) -> SyncResult<()> {
        self.tokens.write().await.remove(key);
        Ok(())
    }
}

/// Token store backed by a JSON file, keyed by the zone key's text form.
///
/// The whole map is rewritten on every change through a temporary file.
pub struct FileTokenStore {
    path: PathBuf,
    tokens: RwLock<HashMap<String, ChangeToken>>,
}

impl FileTokenStore {
    /// Opens the store, loading `path` when it exists.
    pub async fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        let tokens = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(SyncError::Io(e)),
        };
        Ok(Self {
            path,
            tokens: RwLock::new(tokens),
        })
    }

    async fn persist(&self, tokens: &HashMap<String, ChangeToken>) -> SyncResult<()> {
        let bytes = serde_json::to_vec_pretty(tokens)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), count = tokens.len(), "persisted change tokens");
        Ok(())
    }
}

#[async_trait]
impl ChangeTokenStore for FileTokenStore {
    async fn store_token(&self, key: &ChangeTokenKey, token: &ChangeToken) -> SyncResult<()> {
        let mut tokens = self.tokens.write().await;
        tokens.insert(key.to_string(), token.clone());
        self.persist(&tokens).await
    }

    async fn load_token(&self, key: &ChangeTokenKey) -> SyncResult<Option<ChangeToken>> {
        Ok(self.tokens.read().await.get(&key.to_string()).cloned())
    }

    async fn delete_token(&self, key: &ChangeTokenKey) -> SyncResult<()> {
        let mut tokens = self.tokens.write().await;
        if tokens.remove(&key.to_string()).is_some() {
            self.persist(&tokens).await?;
        }
        Ok(())
    }
}
