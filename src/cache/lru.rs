//! Size-bounded LRU cache with hit and eviction counters.

use std::hash::Hash;
use std::num::NonZeroUsize;

use parking_lot::Mutex;

/// Counters reported by [`Lru::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub gets: u64,
    pub hits: u64,
    pub evictions: u64,
    pub size: usize,
    /// 0 means unbounded.
    pub capacity: usize,
}

struct Inner<K: Hash + Eq, V> {
    entries: ::lru::LruCache<K, V>,
    gets: u64,
    hits: u64,
    evictions: u64,
}

/// Thread-safe LRU cache.
///
/// A single mutex guards the entries and the counters. `get_or_create`
/// runs its factory under that mutex, so a factory must be short and must
/// not touch the cache itself.
pub struct Lru<K: Hash + Eq, V> {
    capacity: usize,
    inner: Mutex<Inner<K, V>>,
}

impl<K: Hash + Eq, V> std::fmt::Debug for Lru<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lru")
            .field("capacity", &self.capacity)
            .field("size", &self.inner.lock().entries.len())
            .finish()
    }
}

impl<K: Hash + Eq + Clone, V: Clone> Lru<K, V> {
    /// Create a cache holding at most `capacity` entries; 0 means unbounded.
    pub fn new(capacity: usize) -> Self {
        let entries = match NonZeroUsize::new(capacity) {
            Some(cap) => ::lru::LruCache::new(cap),
            None => ::lru::LruCache::unbounded(),
        };
        Self {
            capacity,
            inner: Mutex::new(Inner {
                entries,
                gets: 0,
                hits: 0,
                evictions: 0,
            }),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        inner.gets += 1;
        let value = inner.entries.get(key).cloned();
        if value.is_some() {
            inner.hits += 1;
        }
        value
    }

    /// Insert or replace `key`, evicting the least recently used entry when full.
    pub fn set(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        Self::insert(&mut inner, key, value);
    }

    fn insert(inner: &mut Inner<K, V>, key: K, value: V) {
        let inserted = key.clone();
        if let Some((old_key, _)) = inner.entries.push(key, value) {
            if old_key != inserted {
                inner.evictions += 1;
            }
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().entries.pop(key)
    }

    /// Return the cached value, or build, insert and return a new one.
    ///
    /// When the factory returns `None` nothing is inserted.
    pub fn get_or_create<F>(&self, key: K, factory: F) -> Option<V>
    where
        F: FnOnce() -> Option<V>,
    {
        let mut inner = self.inner.lock();
        inner.gets += 1;
        if let Some(value) = inner.entries.get(&key) {
            let value = value.clone();
            inner.hits += 1;
            return Some(value);
        }

        let value = factory()?;
        Self::insert(&mut inner, key, value.clone());
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            gets: inner.gets,
            hits: inner.hits,
            evictions: inner.evictions,
            size: inner.entries.len(),
            capacity: self.capacity,
        }
    }
}
