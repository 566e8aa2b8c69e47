//! Byte-range locks
//!
//! A worker takes a lock on `[offset, offset + length)` of a file before
//! reading or writing it. Conflicting requests fail immediately with
//! [`LockError::Unavailable`] (reported to the controller as EAGAIN) instead
//! of waiting.
//!
//! Two flavours exist: kernel record locks on the open file ([`native`]),
//! and application locks kept in a shared store ([`LockCoordinator`]).
//!
//! Application locks check and insert in two separate store round trips, so
//! two workers racing for overlapping ranges can both succeed. Entries never
//! expire: a worker that dies while holding a lock leaves it behind.

#[cfg(unix)]
pub mod native;
pub mod redis_store;
pub mod store;

pub use redis_store::{RedisLockConfig, RedisLockStore};
pub use store::{LockStore, MemoryLockStore};

use crate::content::lock_id;
use crate::error::{LockError, LockResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Requested access mode, recorded with the lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// One held range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    pub host: String,
    pub pid: u32,
    pub offset: u64,
    pub length: u64,
    pub flags: LockMode,
    /// Carried for compatibility; nothing sweeps expired entries
    pub expiration: Option<DateTime<Utc>>,
}

impl LockEntry {
    /// Whether this entry overlaps `[offset, offset + length)`
    pub fn overlaps(&self, offset: u64, length: u64) -> bool {
        ranges_overlap(self.offset, self.length, offset, length)
    }
}

/// Half-open range overlap: `o1 < o2 + l2 && o2 < o1 + l1`
pub fn ranges_overlap(o1: u64, l1: u64, o2: u64, l2: u64) -> bool {
    o1 < o2.saturating_add(l2) && o2 < o1.saturating_add(l1)
}

/// Acquires and releases byte-range locks on behalf of one process
#[derive(Clone)]
pub struct LockCoordinator {
    store: Arc<dyn LockStore>,
    host: String,
    pid: u32,
}

impl LockCoordinator {
    /// Coordinator identifying as `host`/`pid`
    pub fn new(store: Arc<dyn LockStore>, host: impl Into<String>, pid: u32) -> Self {
        Self {
            store,
            host: host.into(),
            pid,
        }
    }

    /// Coordinator for the current process
    pub fn for_current_process(store: Arc<dyn LockStore>) -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());
        Self::new(store, host, std::process::id())
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Ranges currently held on a file handle
    pub async fn held(&self, handle: u64) -> LockResult<Vec<LockEntry>> {
        let fields = self.store.hash_fields_get(&handle.to_string()).await?;
        fields
            .into_iter()
            .map(|(field, value)| {
                serde_json::from_str(&value).map_err(|e| LockError::CorruptEntry {
                    field,
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    /// Take a lock on `[offset, offset + length)`
    ///
    /// Fails with [`LockError::Unavailable`] if any held range overlaps,
    /// without registering anything.
    pub async fn acquire(
        &self,
        handle: u64,
        offset: u64,
        length: u64,
        mode: LockMode,
    ) -> LockResult<()> {
        let held = self.held(handle).await?;
        if let Some(conflict) = held.iter().find(|e| e.overlaps(offset, length)) {
            debug!(
                handle,
                offset,
                length,
                holder = %conflict.host,
                holder_pid = conflict.pid,
                "Lock unavailable"
            );
            return Err(LockError::Unavailable {
                handle,
                offset,
                length,
            });
        }

        let entry = LockEntry {
            host: self.host.clone(),
            pid: self.pid,
            offset,
            length,
            flags: mode,
            expiration: None,
        };
        let value = serde_json::to_string(&entry).map_err(|e| LockError::Store(e.to_string()))?;
        let id = lock_id(handle, &self.host, self.pid, offset, length);
        self.store
            .hash_field_set(&handle.to_string(), &id, &value)
            .await
    }

    /// Drop a lock taken with the same handle and range
    ///
    /// Releasing a lock that is not held is not an error.
    pub async fn release(&self, handle: u64, offset: u64, length: u64) -> LockResult<()> {
        let id = lock_id(handle, &self.host, self.pid, offset, length);
        let existed = self
            .store
            .hash_field_delete(&handle.to_string(), &id)
            .await?;
        if !existed {
            warn!(handle, offset, length, "Released a lock that was not held");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator(store: &Arc<MemoryLockStore>, host: &str) -> LockCoordinator {
        LockCoordinator::new(store.clone(), host, 100)
    }

    #[test]
    fn test_overlap_law() {
        assert!(ranges_overlap(0, 10, 5, 10));
        assert!(ranges_overlap(5, 10, 0, 10));
        assert!(ranges_overlap(0, 10, 0, 10));
        assert!(ranges_overlap(2, 2, 0, 10));
        // Adjacent ranges do not overlap
        assert!(!ranges_overlap(0, 10, 10, 5));
        assert!(!ranges_overlap(10, 5, 0, 10));
        // Saturating end
        assert!(ranges_overlap(u64::MAX - 1, 10, u64::MAX - 2, 5));
    }

    #[tokio::test]
    async fn test_acquire_conflict() {
        let store = Arc::new(MemoryLockStore::new());
        let a = coordinator(&store, "host-a");
        let b = coordinator(&store, "host-b");

        a.acquire(1, 0, 10, LockMode::Exclusive).await.unwrap();
        let err = b.acquire(1, 5, 10, LockMode::Exclusive).await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(store.field_count(), 1);

        // Disjoint range and other handles are fine
        b.acquire(1, 10, 10, LockMode::Exclusive).await.unwrap();
        b.acquire(2, 0, 10, LockMode::Shared).await.unwrap();
        assert_eq!(store.field_count(), 3);
    }

    #[tokio::test]
    async fn test_release_allows_reacquire() {
        let store = Arc::new(MemoryLockStore::new());
        let a = coordinator(&store, "host-a");
        let b = coordinator(&store, "host-b");

        a.acquire(7, 100, 50, LockMode::Exclusive).await.unwrap();
        a.release(7, 100, 50).await.unwrap();
        b.acquire(7, 120, 10, LockMode::Exclusive).await.unwrap();

        let held = b.held(7).await.unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].host, "host-b");
        assert!(held[0].expiration.is_none());
    }

    #[tokio::test]
    async fn test_release_idempotent() {
        let store = Arc::new(MemoryLockStore::new());
        let a = coordinator(&store, "host-a");
        a.release(9, 0, 1).await.unwrap();
        a.acquire(9, 0, 1, LockMode::Exclusive).await.unwrap();
        a.release(9, 0, 1).await.unwrap();
        a.release(9, 0, 1).await.unwrap();
        assert_eq!(store.field_count(), 0);
    }

    #[tokio::test]
    async fn test_release_only_own_range() {
        let store = Arc::new(MemoryLockStore::new());
        let a = coordinator(&store, "host-a");
        let b = coordinator(&store, "host-b");
        a.acquire(3, 0, 10, LockMode::Exclusive).await.unwrap();

        // Same range from another host does not match a's entry
        b.release(3, 0, 10).await.unwrap();
        assert!(b.acquire(3, 0, 10, LockMode::Exclusive).await.is_err());
    }
}
