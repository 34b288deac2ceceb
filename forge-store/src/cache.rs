//! In-memory TTL + LRU cache with namespaced views
//!
//! `get` never returns an expired entry (expired entries are removed on
//! observation). A hit renews the entry's LRU position but not its TTL.
//! `set` evicts the least-recently-used entry when the cache is full.
//! Thread-safe for concurrent readers and writers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    expires_at: Instant,
    /// Monotonic recency stamp; larger = more recently used.
    last_used: u64,
}

/// Cache usage counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub entries: usize,
}

impl CacheStats {
    /// hits / (hits + misses), or 0 when nothing has been looked up.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// TTL + LRU cache.
pub struct Cache<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
    max_entries: usize,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
}

impl<V: Clone> Cache<V> {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Get a live value. Expired entries are removed and count as misses.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock().ok()?;
        let now = Instant::now();
        match entries.get_mut(key) {
            Some(entry) if now <= entry.expires_at => {
                entry.last_used = self.clock.fetch_add(1, Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a value with the given TTL, evicting the LRU entry when full.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            // Evict the least-recently-used entry.
            if let Some(victim) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&victim);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        let now = Instant::now();
        entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
                expires_at: now + ttl,
                last_used: self.clock.fetch_add(1, Ordering::Relaxed),
            },
        );
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    /// Remove a key regardless of expiry. Returns whether it existed.
    pub fn remove(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|mut e| e.remove(key).is_some())
            .unwrap_or(false)
    }

    /// Remove every expired entry and return how many were dropped.
    pub fn prune(&self) -> usize {
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, e| now <= e.expires_at);
        before - entries.len()
    }

    /// Age of a live entry since insertion, if present.
    pub fn age(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.lock().ok()?;
        let entry = entries.get(key)?;
        if Instant::now() > entry.expires_at {
            return None;
        }
        Some(entry.inserted_at.elapsed())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

}

impl<V> std::fmt::Debug for Cache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

/// Prefixed view over a shared cache with a default TTL.
#[derive(Clone)]
pub struct Namespace<V> {
    cache: Arc<Cache<V>>,
    prefix: String,
    default_ttl: Duration,
}

impl<V: Clone> Namespace<V> {
    /// A view over `cache` that prefixes keys with `<name>:` and supplies a
    /// default TTL.
    pub fn new(cache: Arc<Cache<V>>, name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            cache,
            prefix: format!("{}:", name.into()),
            default_ttl: ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.cache.get(&format!("{}{}", self.prefix, key))
    }

    pub fn set(&self, key: &str, value: V) {
        self.cache
            .set(format!("{}{}", self.prefix, key), value, self.default_ttl);
    }

    pub fn set_with_ttl(&self, key: &str, value: V, ttl: Duration) {
        self.cache.set(format!("{}{}", self.prefix, key), value, ttl);
    }

    pub fn remove(&self, key: &str) -> bool {
        self.cache.remove(&format!("{}{}", self.prefix, key))
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// The cache never holds more than `max_entries` values no matter
        /// the insertion sequence.
        #[test]
        fn prop_bounded_size(keys in prop::collection::vec("[a-z]{1,6}", 1..100), cap in 1usize..16) {
            let cache = Cache::new(cap);
            for key in &keys {
                cache.set(key.clone(), 0u8, Duration::from_secs(60));
            }
            prop_assert!(cache.len() <= cap);
        }
    }
}
