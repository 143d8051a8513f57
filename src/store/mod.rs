//! Persistent key-value storage for the filter toggles.
//!
//! Mirrors the browser's extension storage: `get` a list of keys, `set` a map
//! of values, both asynchronous. Absent keys are simply missing from the
//! returned map.

pub mod json_file;
pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub type StoreMap = Map<String, Value>;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, keys: &[&str]) -> Result<StoreMap>;
    async fn set(&self, entries: StoreMap) -> Result<()>;
}

/// Picks `keys` out of `source`, skipping absent ones.
pub(crate) fn select_keys(source: &StoreMap, keys: &[&str]) -> StoreMap {
    keys.iter()
        .filter_map(|key| source.get(*key).map(|value| (key.to_string(), value.clone())))
        .collect()
}
