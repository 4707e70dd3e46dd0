//! Record store contract and the in-memory implementation
//!
//! The gateway persists its state as named records: JSON values keyed by
//! `(collection, key)`, plus an append-only log per collection. Semantics
//! are deliberately thin: last write wins, and bulk tables are replaced
//! wholesale with [`RecordStore::replace_all`].

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::error::Result;

/// Named-record persistence contract
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch one record
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>>;

    /// Store one record, replacing any previous value
    async fn set(&self, collection: &str, key: &str, value: Value) -> Result<()>;

    /// Remove one record; removing a missing record is not an error
    async fn delete(&self, collection: &str, key: &str) -> Result<()>;

    /// List every record in a collection, ordered by key
    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>>;

    /// Replace a collection's entire contents in one idempotent operation
    async fn replace_all(&self, collection: &str, entries: Vec<(String, Value)>) -> Result<()>;

    /// Append a value to a collection's log
    async fn append(&self, collection: &str, value: Value) -> Result<()>;

    /// Read back a collection's log in append order
    async fn log(&self, collection: &str) -> Result<Vec<Value>>;
}

/// In-memory [`RecordStore`], used by tests and as the no-persistence
/// fallback
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, BTreeMap<String, Value>>>,
    logs: RwLock<HashMap<String, Vec<Value>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .records
            .read()
            .get(collection)
            .and_then(|c| c.get(key))
            .cloned())
    }

    async fn set(&self, collection: &str, key: &str, value: Value) -> Result<()> {
        self.records
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<()> {
        if let Some(c) = self.records.write().get_mut(collection) {
            c.remove(key);
        }
        Ok(())
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>> {
        Ok(self
            .records
            .read()
            .get(collection)
            .map(|c| c.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn replace_all(&self, collection: &str, entries: Vec<(String, Value)>) -> Result<()> {
        let mut records = self.records.write();
        records.insert(collection.to_string(), entries.into_iter().collect());
        Ok(())
    }

    async fn append(&self, collection: &str, value: Value) -> Result<()> {
        self.logs
            .write()
            .entry(collection.to_string())
            .or_default()
            .push(value);
        Ok(())
    }

    async fn log(&self, collection: &str) -> Result<Vec<Value>> {
        Ok(self
            .logs
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_get_roundtrip() {
        let store = MemoryStore::new();
        store
            .set("provisioning", "current", json!({"callsign": "N0CALL"}))
            .await
            .unwrap();

        let value = store.get("provisioning", "current").await.unwrap().unwrap();
        assert_eq!(value["callsign"], "N0CALL");
        assert!(store.get("provisioning", "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn last_write_wins() {
        let store = MemoryStore::new();
        store.set("c", "k", json!(1)).await.unwrap();
        store.set("c", "k", json!(2)).await.unwrap();
        assert_eq!(store.get("c", "k").await.unwrap().unwrap(), json!(2));
    }

    #[tokio::test]
    async fn replace_all_is_wholesale() {
        let store = MemoryStore::new();
        store.set("mappings", "old", json!("stale")).await.unwrap();
        store
            .replace_all(
                "mappings",
                vec![
                    ("a".to_string(), json!(1)),
                    ("b".to_string(), json!(2)),
                ],
            )
            .await
            .unwrap();

        let entries = store.list("mappings").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(store.get("mappings", "old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn append_preserves_order() {
        let store = MemoryStore::new();
        store.append("telemetry", json!(1)).await.unwrap();
        store.append("telemetry", json!(2)).await.unwrap();
        assert_eq!(
            store.log("telemetry").await.unwrap(),
            vec![json!(1), json!(2)]
        );
    }

    #[tokio::test]
    async fn delete_missing_is_ok() {
        let store = MemoryStore::new();
        store.delete("c", "missing").await.unwrap();
    }
}
