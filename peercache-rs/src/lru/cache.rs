//! Provides a thread safe wrapper around an [LRUCache](crate::lru::LRUCache).
//!
//! Each [Group](crate::group::Group) owns one of these. The underlying LRU cache is only created
//! once the first value is added, so that groups which never store anything don't allocate any
//! storage. All operations lock the cache for their whole duration, which also means that
//! evictions happen inline within the **add** which exceeded the memory limit.
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::byteview::ByteView;
use crate::lru::{EvictionCallback, LRUCache};

/// Provides a snapshot of the metrics of a cache.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CacheStats {
    /// Contains the number of entries in the cache.
    pub entries: usize,

    /// Contains the number of bytes occupied by keys and values.
    pub allocated_memory: usize,

    /// Contains the memory limit of the cache (0 = unlimited).
    pub max_memory: usize,

    /// Contains the number of lookups.
    pub reads: usize,

    /// Contains the number of lookups which found a value.
    pub hits: usize,

    /// Contains the number of entries evicted due to the memory limit.
    pub evictions: usize,
}

struct State {
    lru: Option<LRUCache<ByteView>>,
    on_evicted: Option<EvictionCallback<ByteView>>,
}

/// Wraps a lazily created LRU cache of [ByteView] values so that it can be shared across threads.
///
/// # Examples
/// ```
/// # use peercache::lru::cache::Cache;
/// # use peercache::byteview::ByteView;
/// let cache = Cache::new(1024);
/// assert_eq!(cache.get("Tom"), None);
///
/// cache.add("Tom", ByteView::from("630"));
/// assert_eq!(cache.get("Tom").unwrap().to_string(), "630");
/// ```
pub struct Cache {
    max_memory: usize,
    state: Mutex<State>,
}

impl Cache {
    /// Creates a new cache which will hold up to **max_memory** bytes (0 = unlimited).
    pub fn new(max_memory: usize) -> Self {
        Cache {
            max_memory,
            state: Mutex::new(State {
                lru: None,
                on_evicted: None,
            }),
        }
    }

    /// Creates a new cache which reports all evicted entries to the given callback.
    ///
    /// Note that the callback is invoked while the cache is locked. It must therefore not
    /// access the cache itself.
    pub fn with_eviction_callback(max_memory: usize, on_evicted: EvictionCallback<ByteView>) -> Self {
        Cache {
            max_memory,
            state: Mutex::new(State {
                lru: None,
                on_evicted: Some(on_evicted),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<State> {
        // None of our operations can leave the LRU in an inconsistent state when a panic
        // occurs (e.g. within an eviction callback), therefore we keep on using it.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores the given value for the given key.
    pub fn add(&self, key: &str, value: ByteView) {
        let mut state = self.lock();
        if state.lru.is_none() {
            let lru = match state.on_evicted.take() {
                Some(callback) => LRUCache::with_eviction_callback(self.max_memory, callback),
                None => LRUCache::new(self.max_memory),
            };
            state.lru = Some(lru);
        }

        if let Some(lru) = state.lru.as_mut() {
            lru.put(key.to_owned(), value);
        }
    }

    /// Returns the value stored for the given key.
    ///
    /// Returns **None** without creating the underlying cache if nothing was added yet.
    pub fn get(&self, key: &str) -> Option<ByteView> {
        self.lock().lru.as_mut()?.get(key).cloned()
    }

    /// Removes the value stored for the given key.
    pub fn remove(&self, key: &str) -> Option<ByteView> {
        self.lock().lru.as_mut()?.remove(key)
    }

    /// Determines if a value is present for the given key without affecting its recency.
    pub fn contains_key(&self, key: &str) -> bool {
        self.lock()
            .lru
            .as_ref()
            .map(|lru| lru.contains_key(key))
            .unwrap_or(false)
    }

    /// Determines if the underlying LRU cache has been created.
    pub fn is_initialized(&self) -> bool {
        self.lock().lru.is_some()
    }

    /// Returns the memory limit of this cache.
    pub fn max_memory(&self) -> usize {
        self.max_memory
    }

    /// Returns a snapshot of the current metrics.
    pub fn stats(&self) -> CacheStats {
        match self.lock().lru.as_ref() {
            Some(lru) => CacheStats {
                entries: lru.len(),
                allocated_memory: lru.allocated_memory(),
                max_memory: self.max_memory,
                reads: lru.reads(),
                hits: lru.hits(),
                evictions: lru.evictions(),
            },
            None => CacheStats {
                max_memory: self.max_memory,
                ..CacheStats::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::byteview::ByteView;
    use crate::lru::cache::Cache;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn the_lru_is_created_lazily() {
        let cache = Cache::new(64);

        // Reading doesn't create the underlying storage...
        assert_eq!(cache.get("Tom"), None);
        assert_eq!(cache.remove("Tom"), None);
        assert_eq!(cache.is_initialized(), false);
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().max_memory, 64);

        // ..but writing does.
        cache.add("Tom", ByteView::from("630"));
        assert_eq!(cache.is_initialized(), true);
        assert_eq!(cache.get("Tom").unwrap().to_string(), "630");
        assert_eq!(cache.stats().allocated_memory, 6);
    }

    #[test]
    fn eviction_callback_is_handed_to_the_lru() {
        let evictions = Arc::new(AtomicUsize::new(0));
        let counter = evictions.clone();
        let cache = Cache::with_eviction_callback(
            8,
            Box::new(move |_key: &str, _value: &ByteView| {
                let _ = counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        cache.add("k1", ByteView::from("v1"));
        cache.add("k2", ByteView::from("v2"));
        cache.add("k3", ByteView::from("v3"));

        assert_eq!(evictions.load(Ordering::SeqCst), 1);
        assert_eq!(cache.contains_key("k1"), false);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn concurrent_access_respects_the_limit() {
        let cache = Arc::new(Cache::new(1024));
        let mut threads = Vec::new();
        for thread in 0..8 {
            let cache = cache.clone();
            threads.push(std::thread::spawn(move || {
                for i in 0..1000 {
                    let key = format!("{}-{}", thread, i % 100);
                    cache.add(&key, ByteView::from("X".repeat(i % 17).as_str()));
                    let _ = cache.get(&key);
                }
            }));
        }

        for thread in threads {
            thread.join().unwrap();
        }

        let stats = cache.stats();
        assert!(stats.allocated_memory <= 1024);
        assert_eq!(stats.reads, 8000);
    }
}
