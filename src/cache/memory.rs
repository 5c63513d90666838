//! In-process cache backend.
//!
//! Unlike an HTTP-native edge cache, a plain map has no expiry of its own, so
//! freshness is checked explicitly against each entry's stored timestamp and
//! `max-age`. The map is bounded; when full, the oldest write is evicted.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::trace;

use super::store::{CacheBackend, CachedEntry, StoreError, StoreFuture};
use super::CacheKey;

/// A bounded, process-local [`CacheBackend`].
pub struct MemoryBackend {
    entries: Mutex<HashMap<CacheKey, CachedEntry>>,
    capacity: usize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
}

impl MemoryBackend {
    pub const DEFAULT_CAPACITY: usize = 1000;

    pub fn new() -> Self {
        Self::default()
    }

    /// A backend holding at most `capacity` entries (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries currently held, fresh or not.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drops every stale entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh());
        before - entries.len()
    }

    fn lookup_now(&self, key: &CacheKey) -> Option<CachedEntry> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_fresh() => Some(entry.clone()),
            Some(_) => {
                trace!(key = %key, "dropping stale entry");
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn put_now(&self, key: CacheKey, entry: CachedEntry) -> Result<(), StoreError> {
        if entry.max_age().is_none() {
            return Err(StoreError::Uncacheable {
                reason: "missing Cache-Control max-age",
            });
        }

        let mut entries = self.entries.lock();
        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.stored_at())
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                trace!(key = %oldest, "evicting oldest entry");
                entries.remove(&oldest);
            }
        }
        entries.insert(key, entry);
        Ok(())
    }
}

impl CacheBackend for MemoryBackend {
    fn lookup<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, Option<CachedEntry>> {
        let found = self.lookup_now(key);
        Box::pin(async move { Ok(found) })
    }

    fn put(&self, key: CacheKey, entry: CachedEntry) -> StoreFuture<'_, ()> {
        let result = self.put_now(key, entry);
        Box::pin(async move { result })
    }

    fn delete<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, bool> {
        let existed = self.entries.lock().remove(key).is_some();
        Box::pin(async move { Ok(existed) })
    }
}
