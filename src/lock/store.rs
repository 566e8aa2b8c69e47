//! Key/value backends for lock entries
//!
//! Each file handle maps to one hash; each held range is one field of it.

use crate::error::LockResult;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Hash-of-fields storage shared by every worker
#[async_trait::async_trait]
pub trait LockStore: Send + Sync {
    /// All fields of a hash (empty when the key does not exist)
    async fn hash_fields_get(&self, key: &str) -> LockResult<HashMap<String, String>>;

    /// Set one field
    async fn hash_field_set(&self, key: &str, field: &str, value: &str) -> LockResult<()>;

    /// Delete one field, returning whether it existed
    async fn hash_field_delete(&self, key: &str, field: &str) -> LockResult<bool>;
}

/// Process-local store
///
/// Only coordinates tasks of a single process; used by tests and
/// single-host runs.
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fields across all keys
    pub fn field_count(&self) -> usize {
        self.hashes.lock().values().map(HashMap::len).sum()
    }
}

#[async_trait::async_trait]
impl LockStore for MemoryLockStore {
    async fn hash_fields_get(&self, key: &str) -> LockResult<HashMap<String, String>> {
        Ok(self.hashes.lock().get(key).cloned().unwrap_or_default())
    }

    async fn hash_field_set(&self, key: &str, field: &str, value: &str) -> LockResult<()> {
        self.hashes
            .lock()
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_field_delete(&self, key: &str, field: &str) -> LockResult<bool> {
        let mut hashes = self.hashes.lock();
        let Some(fields) = hashes.get_mut(key) else {
            return Ok(false);
        };
        let existed = fields.remove(field).is_some();
        if fields.is_empty() {
            hashes.remove(key);
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_fields() {
        let store = MemoryLockStore::new();
        assert!(store.hash_fields_get("k").await.unwrap().is_empty());

        store.hash_field_set("k", "a", "1").await.unwrap();
        store.hash_field_set("k", "b", "2").await.unwrap();
        let fields = store.hash_fields_get("k").await.unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["a"], "1");

        assert!(store.hash_field_delete("k", "a").await.unwrap());
        assert!(!store.hash_field_delete("k", "a").await.unwrap());
        assert!(!store.hash_field_delete("missing", "a").await.unwrap());
        assert_eq!(store.field_count(), 1);
    }
}
