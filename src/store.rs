/*!
 * File-backed persistent store
 *
 * # Overview
 *
 * Persists the key/value records the core components rely on as a single
 * JSON document under the state directory. Writes go through a temp file
 * followed by a rename so a crash mid-write never leaves a torn document.
 */

use async_trait::async_trait;
use sacristan_core_vigil::store::KeyValueStore;
use sacristan_core_vigil::VigilError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

const STORE_FILE: &str = "state.json";

/// Key/value store persisted to a JSON file in the state directory
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    /// Cached document, kept in sync with the file
    inner: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Open (or create) the store under the given state directory.
    pub fn open(state_dir: &Path) -> Result<Self, VigilError> {
        let path = state_dir.join(STORE_FILE);
        let map = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| VigilError::Storage(format!("read {}: {}", path.display(), e)))?;
            serde_json::from_str(&raw)
                .map_err(|e| VigilError::Storage(format!("parse {}: {}", path.display(), e)))?
        } else {
            HashMap::new()
        };
        debug!(path = %path.display(), entries = map.len(), "opened file store");
        Ok(FileStore {
            path,
            inner: Mutex::new(map),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, map: &HashMap<String, String>) -> Result<(), VigilError> {
        let raw = serde_json::to_string_pretty(map)
            .map_err(|e| VigilError::Storage(format!("serialize store: {}", e)))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, raw)
            .map_err(|e| VigilError::Storage(format!("write {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| VigilError::Storage(format!("rename {}: {}", tmp.display(), e)))?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, VigilError> {
        let map = self.inner.lock().await;
        Ok(map.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), VigilError> {
        let mut map = self.inner.lock().await;
        map.insert(key.to_string(), value.to_string());
        self.persist(&map)
    }

    async fn remove(&self, key: &str) -> Result<(), VigilError> {
        let mut map = self.inner.lock().await;
        if map.remove(key).is_some() {
            self.persist(&map)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.set("alpha", "one").await.unwrap();
        assert_eq!(store.get("alpha").await.unwrap(), Some("one".to_string()));
        assert_eq!(store.get("beta").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.set("alpha", "one").await.unwrap();
            store.set("beta", "two").await.unwrap();
            store.remove("alpha").await.unwrap();
        }
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.get("alpha").await.unwrap(), None);
        assert_eq!(store.get("beta").await.unwrap(), Some("two".to_string()));
    }

    #[tokio::test]
    async fn test_remove_missing_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.remove("ghost").await.unwrap();
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_rejects_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STORE_FILE), "{not json").unwrap();
        assert!(FileStore::open(dir.path()).is_err());
    }
}
