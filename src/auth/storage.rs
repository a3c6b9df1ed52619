use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::auth::token::User;
use crate::error::{Result, SessionError};

/// Prefix shared by every key the auth layer writes
pub const STATE_KEY_PREFIX: &str = "oidc.";

/// Key/value persistence with browser-storage semantics
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
    /// Remove a key, returning the previous value
    async fn remove(&self, key: &str) -> Result<Option<String>>;
    async fn keys(&self) -> Result<Vec<String>>;
}

/// In-memory store; contents are lost when dropped
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.write().await.remove(key))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}

/// Store persisted as a single JSON document, saved after every mutation
pub struct FileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or create on first save) a store at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = match tokio::fs::read(&path).await {
            Ok(data) if data.is_empty() => BTreeMap::new(),
            Ok(data) => serde_json::from_slice(&data).map_err(|e| {
                error!(error = %e, path = %path.display(), "Failed to parse state file");
                SessionError::Storage(format!(
                    "Failed to parse state file {}: {}",
                    path.display(),
                    e
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No state file yet, starting empty");
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn save(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let data = serde_json::to_vec_pretty(entries)?;
        tokio::fs::write(&self.path, data).await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), value);
        self.save(&entries).await
    }

    async fn remove(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.write().await;
        let previous = entries.remove(key);
        if previous.is_some() {
            self.save(&entries).await?;
        }
        Ok(previous)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}

/// Structure for storing the user record with integrity checks
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserStoragePayload {
    user: User,
    integrity_hash: String,
}

/// Token store adapter: the single source of truth for the current user
#[derive(Clone)]
pub struct UserStore {
    store: Arc<dyn StateStore>,
    key: String,
}

impl UserStore {
    /// Create a user store scoped to an authority and client
    pub fn new(store: Arc<dyn StateStore>, authority: &str, client_id: &str) -> Self {
        Self {
            store,
            key: format!("{}user:{}:{}", STATE_KEY_PREFIX, authority, client_id),
        }
    }

    /// The storage key holding the user record
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Persist the user record
    pub async fn store(&self, user: &User) -> Result<()> {
        let payload = UserStoragePayload {
            user: user.clone(),
            integrity_hash: Self::calculate_integrity_hash(user),
        };

        self.store
            .set(&self.key, serde_json::to_string(&payload)?)
            .await?;

        info!(subject = %user.profile.sub, "User stored");
        Ok(())
    }

    /// Load the user record.
    ///
    /// A record that cannot be parsed or fails its integrity check is removed
    /// and reported as absent.
    pub async fn retrieve(&self) -> Result<Option<User>> {
        let raw = match self.store.get(&self.key).await? {
            Some(raw) => raw,
            None => {
                debug!("No user found in storage");
                return Ok(None);
            }
        };

        let payload = match serde_json::from_str::<UserStoragePayload>(&raw) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Stored user record is unreadable, discarding");
                self.store.remove(&self.key).await?;
                return Ok(None);
            }
        };

        if Self::calculate_integrity_hash(&payload.user) != payload.integrity_hash {
            error!("User record integrity check failed, possible tampering");
            self.store.remove(&self.key).await?;
            return Ok(None);
        }

        Ok(Some(payload.user))
    }

    /// Remove the user record
    pub async fn clear(&self) -> Result<()> {
        if self.store.remove(&self.key).await?.is_some() {
            info!("User removed from storage");
        } else {
            debug!("No user to remove from storage");
        }
        Ok(())
    }

    fn calculate_integrity_hash(user: &User) -> String {
        let token_string = format!(
            "{}:{}:{}:{}",
            user.access_token,
            user.id_token.as_deref().unwrap_or(""),
            user.profile.sub,
            user.expires_at.map_or_else(String::new, |e| e.to_string())
        );

        let mut hasher = Sha256::new();
        hasher.update(token_string.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}
