use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};

/// Consider an entry absent after 5 minutes.
/// Prices change slowly; this mostly absorbs repeated reads from the UI.
pub const CACHE_TTL_MINUTES: i64 = 5;

#[derive(Debug, Clone)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age(&self) -> Duration {
        Utc::now() - self.cached_at
    }

    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.age() > ttl
    }
}

/// Build a cache key from a read method's identifying parameters.
pub fn cache_key(parts: &[&str]) -> String {
    parts.join(":")
}

/// In-memory TTL map. Stale entries are treated as absent on lookup; there is
/// no background sweeper. Replacing an entry is last-write-wins.
pub struct ResponseCache<T> {
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedData<T>>>,
}

impl<T: Clone> ResponseCache<T> {
    pub fn new() -> Self {
        Self::with_ttl(Duration::minutes(CACHE_TTL_MINUTES))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.read()
            .get(key)
            .filter(|cached| !cached.is_stale(self.ttl))
            .map(|cached| cached.data.clone())
    }

    pub fn set(&self, key: impl Into<String>, value: T) {
        self.write().insert(key.into(), CachedData::new(value));
    }

    /// Number of stored entries, stale ones included.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, key: &str, by: Duration) {
        if let Some(cached) = self.write().get_mut(key) {
            cached.cached_at = cached.cached_at - by;
        }
    }

    // Entries are plain data, so a poisoned lock still holds a usable map
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CachedData<T>>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CachedData<T>>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Clone> Default for ResponseCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
