use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{select_keys, KeyValueStore, StoreMap};

const ENABLE_LOGS: bool = true;

use crate::log_warn;

/// Single JSON object on disk, rewritten on every `set`.
pub struct JsonFileStore {
    path: PathBuf,
    data: RwLock<StoreMap>,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read store from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log_warn!("store at {} is unreadable ({err}); starting empty", path.display());
                StoreMap::new()
            })
        } else {
            StoreMap::new()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreMap> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreMap> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn persist(&self, data: &StoreMap) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create store directory {}", parent.display())
            })?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write store to {}", self.path.display()))
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, keys: &[&str]) -> Result<StoreMap> {
        Ok(select_keys(&self.read(), keys))
    }

    async fn set(&self, entries: StoreMap) -> Result<()> {
        let mut guard = self.write();
        let mut next = guard.clone();
        next.extend(entries);
        // Memory only moves once the file has the new contents.
        self.persist(&next)?;
        *guard = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let store = JsonFileStore::new(path.clone()).unwrap();
        let mut entries = StoreMap::new();
        entries.insert("hideRetweets".into(), json!(true));
        store.set(entries).await.unwrap();

        let reopened = JsonFileStore::new(path).unwrap();
        let values = reopened.get(&["hideLikes", "hideRetweets"]).await.unwrap();
        assert_eq!(values.get("hideRetweets"), Some(&json!(true)));
        assert!(!values.contains_key("hideLikes"));
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "{ not json").unwrap();

        let store = JsonFileStore::new(path).unwrap();
        assert!(store.get(&["hideLikes"]).await.unwrap().is_empty());
    }
}
