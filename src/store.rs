//! In-memory index of stored objects.
//!
//! The index and its byte counters sit behind one mutex. Every operation
//! takes the lock once, does its bookkeeping and releases it; nothing here
//! awaits or touches the backing store while holding it.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use utoipa::ToSchema;

/// Metadata for one stored object. Records are write-once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectRecord {
    pub id: String,
    pub filename: String,
    pub size_bytes: u64,
    /// Unix timestamp in seconds
    pub created_at: i64,
}

impl ObjectRecord {
    pub fn new(
        id: impl Into<String>,
        filename: impl Into<String>,
        size_bytes: u64,
        created_at: i64,
    ) -> Self {
        Self {
            id: id.into(),
            filename: filename.into(),
            size_bytes,
            created_at,
        }
    }

    pub fn is_expired(&self, now: i64, ttl: Duration) -> bool {
        now.saturating_sub(self.created_at) >= ttl_secs(ttl)
    }

    pub fn expires_at(&self, ttl: Duration) -> i64 {
        self.created_at.saturating_add(ttl_secs(ttl))
    }
}

fn ttl_secs(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmitError {
    #[error("object {0} already exists")]
    AlreadyExists(String),

    #[error("storage quota exceeded ({requested} bytes requested, {available} available)")]
    QuotaExceeded { requested: u64, available: u64 },
}

/// Consistent snapshot of the store counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct StoreStats {
    /// Number of live objects
    pub count: usize,
    /// Bytes held by admitted objects
    pub used_bytes: u64,
    /// Bytes promised to uploads still being written
    pub reserved_bytes: u64,
    /// Global quota
    pub capacity_bytes: u64,
}

#[derive(Debug, Default)]
struct State {
    index: HashMap<String, ObjectRecord>,
    used_bytes: u64,
    reserved_bytes: u64,
}

impl State {
    fn available(&self, capacity: u64) -> u64 {
        capacity.saturating_sub(self.used_bytes.saturating_add(self.reserved_bytes))
    }

    fn ensure_fits(&self, capacity: u64, requested: u64) -> Result<(), AdmitError> {
        let available = self.available(capacity);
        if requested > available {
            return Err(AdmitError::QuotaExceeded {
                requested,
                available,
            });
        }
        Ok(())
    }

    fn remove(&mut self, id: &str) -> Option<ObjectRecord> {
        let record = self.index.remove(id)?;
        self.used_bytes -= record.size_bytes;
        Some(record)
    }
}

#[derive(Debug)]
pub struct ObjectStore {
    capacity: u64,
    state: Mutex<State>,
}

impl ObjectStore {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            state: Mutex::new(State::default()),
        }
    }

    // Poison is ignored: each mutation pairs one index change with its counter.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a record if its id is new and its size fits in the quota.
    pub fn admit(&self, record: ObjectRecord) -> Result<(), AdmitError> {
        let mut state = self.lock();
        if state.index.contains_key(&record.id) {
            return Err(AdmitError::AlreadyExists(record.id));
        }
        state.ensure_fits(self.capacity, record.size_bytes)?;
        state.used_bytes += record.size_bytes;
        state.index.insert(record.id.clone(), record);
        Ok(())
    }

    /// Sets aside `size_bytes` of quota for an upload that has not been
    /// written yet. The bytes are released when the reservation is dropped
    /// without being committed.
    pub fn reserve(&self, size_bytes: u64) -> Result<Reservation<'_>, AdmitError> {
        let mut state = self.lock();
        state.ensure_fits(self.capacity, size_bytes)?;
        state.reserved_bytes += size_bytes;
        Ok(Reservation {
            store: self,
            size_bytes,
            settled: false,
        })
    }

    pub fn get(&self, id: &str) -> Option<ObjectRecord> {
        self.lock().index.get(id).cloned()
    }

    pub fn evict(&self, id: &str) -> Option<ObjectRecord> {
        self.lock().remove(id)
    }

    /// Removes every record whose age has reached `ttl` and returns them so
    /// the caller can delete the backing bytes.
    pub fn evict_expired(&self, now: i64, ttl: Duration) -> Vec<ObjectRecord> {
        let mut state = self.lock();
        let expired: Vec<String> = state
            .index
            .values()
            .filter(|record| record.is_expired(now, ttl))
            .map(|record| record.id.clone())
            .collect();

        expired
            .iter()
            .filter_map(|id| state.remove(id))
            .collect()
    }

    pub fn used_bytes(&self) -> u64 {
        self.lock().used_bytes
    }

    pub fn stats(&self) -> StoreStats {
        let state = self.lock();
        StoreStats {
            count: state.index.len(),
            used_bytes: state.used_bytes,
            reserved_bytes: state.reserved_bytes,
            capacity_bytes: self.capacity,
        }
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        let state = self.lock();
        let sum: u64 = state.index.values().map(|r| r.size_bytes).sum();
        assert_eq!(state.used_bytes, sum, "used_bytes drifted from the index");
    }
}

/// Quota held for one in-flight upload.
#[must_use = "dropping a reservation releases its quota"]
#[derive(Debug)]
pub struct Reservation<'a> {
    store: &'a ObjectStore,
    size_bytes: u64,
    settled: bool,
}

impl<'a> Reservation<'a> {
    /// Turns the reservation into an admitted record. On an id collision the
    /// reservation is handed back untouched so the caller can retry.
    pub fn commit(
        mut self,
        id: impl Into<String>,
        filename: impl Into<String>,
        now: i64,
    ) -> Result<ObjectRecord, (AdmitError, Self)> {
        let store = self.store;
        let record = ObjectRecord::new(id, filename, self.size_bytes, now);
        let mut state = store.lock();
        if state.index.contains_key(&record.id) {
            drop(state);
            return Err((AdmitError::AlreadyExists(record.id), self));
        }
        state.reserved_bytes -= self.size_bytes;
        state.used_bytes += self.size_bytes;
        state.index.insert(record.id.clone(), record.clone());
        drop(state);

        self.settled = true;
        Ok(record)
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.store.lock().reserved_bytes -= self.size_bytes;
        }
    }
}
