//! Registry: name -> Instance map plus a per-name lock providing mutual
//! exclusion for the mutating operations, with persistence mirrored on
//! every mutation (failures are logged and surfaced, never rolled back
//! in-memory).

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Semaphore, OwnedSemaphorePermit};

use crate::error::SupervisorError;
use crate::instance::Instance;
use crate::persistence::{InstanceRecord, PersistenceStore};

struct Entry {
    instance: Arc<Instance>,
    created_at: i64,
    owner: Option<String>,
}

/// `name -> Instance` with per-name mutual exclusion. `List`/`Get` take
/// only a short read over the outer map; mutating operations additionally
/// hold the per-name lock. Locks are kept in their own map, separate from
/// `entries`, so `Create` can serialize on a name before any instance
/// exists for it.
pub struct Registry {
    entries: DashMap<String, Entry>,
    // Single-permit semaphores, same mutual-exclusion shape as
    // `system::Locker`; owned permits are used here (rather than
    // `Locker`'s borrowed one) because the guard must outlive the DashMap
    // shard guard that `lock()` is called through.
    locks: DashMap<String, Arc<Semaphore>>,
    persistence: Arc<PersistenceStore>,
}

impl Registry {
    pub fn new(persistence: Arc<PersistenceStore>) -> Self {
        Self {
            entries: DashMap::new(),
            locks: DashMap::new(),
            persistence,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Instance>> {
        self.entries.get(name).map(|e| e.instance.clone())
    }

    pub fn list(&self) -> Vec<Arc<Instance>> {
        self.entries.iter().map(|e| e.instance.clone()).collect()
    }

    /// Acquire the per-name lock for a mutating operation, creating the
    /// lock slot on first use (so it is available for `Create`, before any
    /// instance exists under `name`). The caller holds the returned guard
    /// for the duration of the operation.
    pub async fn lock(&self, name: &str) -> OwnedSemaphorePermit {
        let semaphore = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone();
        semaphore
            .acquire_owned()
            .await
            .expect("lock semaphore is never closed")
    }

    pub fn insert(&self, name: String, instance: Arc<Instance>, owner: Option<String>, created_at: i64) {
        self.entries.insert(name, Entry { instance, created_at, owner });
    }

    pub fn remove(&self, name: &str) {
        self.entries.remove(name);
        self.locks.remove(name);
    }

    /// `(created_at, owner)` for `name`, as recorded at `insert` time.
    pub fn meta(&self, name: &str) -> Option<(i64, Option<String>)> {
        self.entries.get(name).map(|e| (e.created_at, e.owner.clone()))
    }

    /// Mirror the current in-memory state of `name` to the persistence
    /// store. Logged and surfaced on failure; the caller decides whether to
    /// propagate it, but the in-memory mutation it follows is never undone.
    pub async fn persist(&self, name: &str) -> Result<(), SupervisorError> {
        let Some(entry) = self.entries.get(name) else {
            return Ok(());
        };
        let record = InstanceRecord {
            name: name.to_string(),
            created_at: entry.created_at,
            status: entry.instance.status(),
            owner: entry.owner.clone(),
            options: entry.instance.get_options(),
        };
        drop(entry);

        self.persistence.upsert(&record).await.map_err(|e| {
            tracing::error!(instance = name, error = %e, "failed to persist instance record");
            SupervisorError::Internal(format!("persistence failed: {e}"))
        })
    }

    pub async fn forget(&self, name: &str) -> Result<(), SupervisorError> {
        self.persistence.delete(name).await.map_err(|e| {
            tracing::error!(instance = name, error = %e, "failed to delete persisted instance record");
            SupervisorError::Internal(format!("persistence failed: {e}"))
        })
    }
}
