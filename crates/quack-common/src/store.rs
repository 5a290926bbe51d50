//! Injected key-value state store.
//!
//! Everything the companion persists (credentials, guideline lists, the chat
//! transcript, the installation id) goes through [`StateStore`]. Backends:
//! Redis ([`crate::redis::RedisStore`]), a single JSON file ([`FileStore`]) and
//! process memory ([`MemoryStore`], also the test double).
//!
//! Key schema (namespaced with [`KEY_PREFIX`]):
//! - `quack:v1:credentials` — JSON CredentialState
//! - `quack:v1:guidelines:{scope}` — JSON Vec<Guideline>, scope is `repo:{id}` or `account`
//! - `quack:v1:chat` — JSON Vec<ChatMessage>
//! - `quack:v1:installation_id` — plain string
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::CommonError;

pub const KEY_PREFIX: &str = "quack:v1:";

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CommonError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), CommonError>;
    async fn delete(&self, key: &str) -> Result<(), CommonError>;
}

/// Full store key for a logical name.
pub fn key(name: &str) -> String {
    format!("{KEY_PREFIX}{name}")
}

/// Read and decode a JSON value. Undecodable data is treated as absent.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn StateStore,
    key: &str,
) -> Result<Option<T>, CommonError> {
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };
    Ok(serde_json::from_str(&raw)
        .inspect_err(|e| warn!(error = %e, key, "stored value deserialization failed"))
        .ok())
}

pub async fn set_json<T: Serialize + ?Sized>(
    store: &dyn StateStore,
    key: &str,
    value: &T,
) -> Result<(), CommonError> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw).await
}

/// Per-installation anonymous identifier, generated on first use.
pub async fn installation_id(store: &dyn StateStore) -> Result<String, CommonError> {
    let key = key("installation_id");
    if let Some(id) = store.get(&key).await?.filter(|id| !id.is_empty()) {
        return Ok(id);
    }
    let id = new_installation_id();
    store.set(&key, &id).await?;
    Ok(id)
}

fn new_installation_id() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id();

    let mut h = Sha256::new();
    h.update(now.as_nanos().to_le_bytes());
    h.update(pid.to_le_bytes());
    h.update(counter.to_le_bytes());
    let digest = h.finalize();
    format!("{:x}", digest)[..32].to_string()
}

// --- Memory ---

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CommonError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CommonError> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CommonError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

// --- JSON file ---

/// All entries in one pretty-printed JSON object, rewritten on every change.
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Open the state file, starting empty when it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CommonError> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            if contents.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&contents)?
            }
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self, entries: &HashMap<String, String>) -> Result<(), CommonError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_string_pretty(entries)?;
        tokio::fs::write(&self.path, contents).await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CommonError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CommonError> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries).await
    }

    async fn delete(&self, key: &str) -> Result<(), CommonError> {
        let mut entries = self.entries.lock().await;
        if entries.remove(key).is_some() {
            self.flush(&entries).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn json_round_trip_through_memory() {
        let store = MemoryStore::new();
        set_json(&store, &key("list"), &vec![1, 2, 3]).await.unwrap();
        let back: Option<Vec<i32>> = get_json(&store, &key("list")).await.unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn corrupt_value_reads_as_absent() {
        let store = MemoryStore::new();
        store.set(&key("list"), "{not json").await.unwrap();
        let back: Option<Vec<i32>> = get_json(&store, &key("list")).await.unwrap();
        assert!(back.is_none());
    }

    #[tokio::test]
    async fn installation_id_is_stable() {
        let store = MemoryStore::new();
        let first = installation_id(&store).await.unwrap();
        let second = installation_id(&store).await.unwrap();
        assert_eq!(first.len(), 32);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let store = FileStore::open(&path).unwrap();
        store.set(&key("endpoint"), "https://api.example").await.unwrap();
        store.set(&key("gone"), "x").await.unwrap();
        store.delete(&key("gone")).await.unwrap();
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(
            reopened.get(&key("endpoint")).await.unwrap().as_deref(),
            Some("https://api.example")
        );
        assert!(reopened.get(&key("gone")).await.unwrap().is_none());
    }
}
