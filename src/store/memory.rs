use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Mutex, MutexGuard,
};

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::{select_keys, KeyValueStore, StoreMap};

/// Process-local store. Lives as long as the value does; useful as the
/// default backend and for exercising write failures.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<StoreMap>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(values: StoreMap) -> Self {
        Self {
            values: Mutex::new(values),
            ..Self::default()
        }
    }

    /// Makes every subsequent `set` fail until switched back.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of acknowledged writes.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> StoreMap {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, StoreMap> {
        match self.values.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, keys: &[&str]) -> Result<StoreMap> {
        Ok(select_keys(&self.lock(), keys))
    }

    async fn set(&self, entries: StoreMap) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("memory store is rejecting writes");
        }
        self.lock().extend(entries);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn get_returns_only_present_keys() {
        let store = MemoryStore::new();
        let mut entries = StoreMap::new();
        entries.insert("hideLikes".into(), json!(true));
        store.set(entries).await.unwrap();

        let values = store.get(&["hideLikes", "hideRetweets"]).await.unwrap();
        assert_eq!(values.get("hideLikes"), Some(&json!(true)));
        assert!(!values.contains_key("hideRetweets"));
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn failing_writes_leave_values_untouched() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);

        let mut entries = StoreMap::new();
        entries.insert("hideLikes".into(), json!(true));
        assert!(store.set(entries).await.is_err());
        assert!(store.snapshot().is_empty());
        assert_eq!(store.writes(), 0);
    }
}
