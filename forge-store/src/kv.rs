//! Namespaced, file-backed key/value persistence
//!
//! One JSON file per collection under `<data_dir>/store/`. Writes replace the
//! whole file via temp-file + rename, so a crash leaves at most one
//! collection with a stale tail and individual entries are atomic. Readers
//! tolerate absent or truncated files by treating them as empty. Writers
//! within one process serialize per collection through a reader-writer lock;
//! cross-process concurrency is undefined.

use forge_core::{ForgeResult, StoreError};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

/// File-backed KV store with independent collections.
pub struct KvStore {
    root: PathBuf,
    /// Per-collection locks, created on first touch.
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl KvStore {
    /// Open a store rooted at `<data_dir>/store`. The directory is created
    /// lazily on first write.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: data_dir.into().join("store"),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Get a value, or None if the key (or collection) is absent.
    pub async fn get(&self, collection: &str, key: &str) -> ForgeResult<Option<Value>> {
        let lock = self.lock_for(collection)?;
        let _guard = lock.read().await;
        let map = self.read_collection(collection).await?;
        Ok(map.get(key).cloned())
    }

    /// Set a value, creating the collection if needed.
    pub async fn set(&self, collection: &str, key: &str, value: Value) -> ForgeResult<()> {
        validate_collection_name(collection)?;
        let lock = self.lock_for(collection)?;
        let _guard = lock.write().await;
        let mut map = self.read_collection(collection).await?;
        map.insert(key.to_string(), value);
        self.write_collection(collection, &map).await
    }

    /// Delete a key. Returns whether it existed.
    pub async fn delete(&self, collection: &str, key: &str) -> ForgeResult<bool> {
        let lock = self.lock_for(collection)?;
        let _guard = lock.write().await;
        let mut map = self.read_collection(collection).await?;
        let existed = map.remove(key).is_some();
        if existed {
            self.write_collection(collection, &map).await?;
        }
        Ok(existed)
    }

    /// All keys in a collection.
    pub async fn keys(&self, collection: &str) -> ForgeResult<Vec<String>> {
        let lock = self.lock_for(collection)?;
        let _guard = lock.read().await;
        let map = self.read_collection(collection).await?;
        Ok(map.keys().cloned().collect())
    }

    /// The whole collection as a key → value map.
    pub async fn all(&self, collection: &str) -> ForgeResult<Map<String, Value>> {
        let lock = self.lock_for(collection)?;
        let _guard = lock.read().await;
        self.read_collection(collection).await
    }

    /// Entries matching a predicate.
    pub async fn query<F>(&self, collection: &str, filter: F) -> ForgeResult<Vec<(String, Value)>>
    where
        F: Fn(&str, &Value) -> bool,
    {
        let map = self.all(collection).await?;
        Ok(map
            .into_iter()
            .filter(|(k, v)| filter(k, v))
            .collect())
    }

    /// Names of all collections present on disk.
    pub async fn collections(&self) -> ForgeResult<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(_) => return Ok(names),
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove a collection file entirely. Returns whether it existed.
    pub async fn drop_collection(&self, collection: &str) -> ForgeResult<bool> {
        validate_collection_name(collection)?;
        let lock = self.lock_for(collection)?;
        let _guard = lock.write().await;
        let path = self.collection_path(collection);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::WriteFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
            .into()),
        }
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.root.join(format!("{}.json", collection))
    }

    fn lock_for(&self, collection: &str) -> Result<Arc<RwLock<()>>, StoreError> {
        let mut locks = self.locks.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(locks
            .entry(collection.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone())
    }

    async fn read_collection(&self, collection: &str) -> ForgeResult<Map<String, Value>> {
        let path = self.collection_path(collection);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => {
                return Err(StoreError::ReadFailed {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                }
                .into())
            }
        };
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Ok(map),
            // Truncated or otherwise unparsable files read as empty.
            _ => {
                tracing::warn!(path = %path.display(), "Collection file unreadable, treating as empty");
                Ok(Map::new())
            }
        }
    }

    async fn write_collection(
        &self,
        collection: &str,
        map: &Map<String, Value>,
    ) -> ForgeResult<()> {
        let path = self.collection_path(collection);
        write_json_atomic(&path, &Value::Object(map.clone())).await
    }
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore").field("root", &self.root).finish()
    }
}

/// Serialize `value` as pretty JSON and atomically replace `path`
/// (write to `<path>.tmp`, then rename over the target).
pub async fn write_json_atomic(path: &Path, value: &Value) -> ForgeResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::WriteFailed {
                path: parent.display().to_string(),
                reason: e.to_string(),
            })?;
    }
    let text = serde_json::to_string_pretty(value).map_err(|e| StoreError::SerializeFailed {
        reason: e.to_string(),
    })?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, text.as_bytes())
        .await
        .map_err(|e| StoreError::WriteFailed {
            path: tmp.display().to_string(),
            reason: e.to_string(),
        })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::WriteFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    Ok(())
}

fn validate_collection_name(collection: &str) -> Result<(), StoreError> {
    let valid = !collection.is_empty()
        && collection
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::WriteFailed {
            path: collection.to_string(),
            reason: "collection names must be [A-Za-z0-9_-]+".to_string(),
        })
    }
}
