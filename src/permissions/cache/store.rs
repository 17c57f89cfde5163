/*!
 * Cache Stores
 * Opaque key/value storage with TTL semantics
 */

use crate::core::clock::SharedClock;
use ahash::RandomState;
use dashmap::DashMap;
use std::time::{Duration, SystemTime};

/// Time-bounded key/value store backing decision cache entries and rate buckets
pub trait CacheStore: Send + Sync {
    /// Value for `key` unless absent or expired
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, value: String, ttl: Duration);
    fn remove(&self, key: &str);
    fn clear(&self);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct StoredValue {
    value: String,
    expires_at: SystemTime,
}

/// Bounded in-memory store
///
/// # Performance
/// - Cache-line aligned so readers on other cores do not false-share the map header
#[repr(C, align(64))]
pub struct MemoryCacheStore {
    entries: DashMap<String, StoredValue, RandomState>,
    max_size: usize,
    clock: SharedClock,
}

impl MemoryCacheStore {
    pub fn new(max_size: usize, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::with_capacity_and_hasher(max_size, RandomState::new()),
            max_size,
            clock,
        }
    }

    /// Make room for one insert: expired entries first, then the soonest to expire
    fn evict(&self, now: SystemTime) {
        self.entries.retain(|_, stored| stored.expires_at > now);
        if self.entries.len() < self.max_size {
            return;
        }

        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().expires_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Some(entry.value.clone());
            }
            drop(entry);
            self.entries.remove(key);
        }
        None
    }

    fn put(&self, key: &str, value: String, ttl: Duration) {
        let now = self.clock.now();
        if self.max_size == 0 {
            return;
        }
        if !self.entries.contains_key(key) && self.entries.len() >= self.max_size {
            self.evict(now);
        }
        self.entries.insert(
            key.to_string(),
            StoredValue {
                value,
                expires_at: now + ttl,
            },
        );
    }

    fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    fn clear(&self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
