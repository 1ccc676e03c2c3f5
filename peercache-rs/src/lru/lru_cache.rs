use linked_hash_map::LinkedHashMap;

/// Returns the allocated memory in bytes.
pub trait ByteSize {
    /// Returns the amount of allocated memory in bytes.
    ///
    /// This is used to account for the memory occupied by a cache entry. The size of an entry is
    /// the length of its key plus the allocated size of its value.
    fn allocated_size(&self) -> usize;
}

impl ByteSize for String {
    fn allocated_size(&self) -> usize {
        self.len()
    }
}

/// Invoked with the key and value of each entry which is evicted to make room.
pub type EvictionCallback<V> = Box<dyn FnMut(&str, &V) + Send>;

/// Provides a size constrained LRU cache.
///
/// A cache behaves just like a **Map** as long as there is no shortage in storage. However, if
/// the allocated memory is above the given limit, old (least recently used) entries will be
/// evicted - hence the name LRU cache. A **max_memory** of 0 disables the limit.
///
/// Note that this cache isn't thread safe. [Cache](crate::lru::cache::Cache) wraps it for
/// concurrent use.
///
/// # Examples
/// ```
/// # use peercache::lru::LRUCache;
/// let mut lru = LRUCache::new(16);
///
/// // Both scores occupy 13 of the 16 bytes...
/// lru.put("Tom".to_owned(), "630".to_owned());
/// lru.put("Jack".to_owned(), "589".to_owned());
/// assert_eq!(lru.allocated_memory(), 13);
///
/// // ..so that Tom has to make room for Sam.
/// lru.put("Sam".to_owned(), "567".to_owned());
/// assert_eq!(lru.get("Tom"), None);
/// assert_eq!(lru.get("Jack").map(String::as_str), Some("589"));
/// assert_eq!(lru.allocated_memory(), 13);
///```
pub struct LRUCache<V: ByteSize> {
    allocated_memory: usize,
    max_memory: usize,
    reads: usize,
    hits: usize,
    writes: usize,
    evictions: usize,
    map: LinkedHashMap<String, V>,
    on_evicted: Option<EvictionCallback<V>>,
}

impl<V: ByteSize> LRUCache<V> {
    /// Creates a new cache which stores entries until they allocated **max_memory** bytes.
    pub fn new(max_memory: usize) -> Self {
        LRUCache {
            allocated_memory: 0,
            max_memory,
            reads: 0,
            hits: 0,
            writes: 0,
            evictions: 0,
            map: LinkedHashMap::new(),
            on_evicted: None,
        }
    }

    /// Creates a new cache which notifies the given callback for each evicted entry.
    ///
    /// # Examples
    /// ```
    /// # use peercache::lru::LRUCache;
    /// # use std::sync::{Arc, Mutex};
    /// let evicted = Arc::new(Mutex::new(Vec::new()));
    /// let sink = evicted.clone();
    /// let mut lru = LRUCache::with_eviction_callback(
    ///     10,
    ///     Box::new(move |key: &str, _value: &String| sink.lock().unwrap().push(key.to_owned())),
    /// );
    ///
    /// lru.put("k1".to_owned(), "v1".to_owned());
    /// lru.put("k2".to_owned(), "v2".to_owned());
    /// lru.put("k3".to_owned(), "v3".to_owned());
    ///
    /// assert_eq!(*evicted.lock().unwrap(), vec!["k1".to_owned()]);
    /// ```
    pub fn with_eviction_callback(max_memory: usize, on_evicted: EvictionCallback<V>) -> Self {
        let mut cache = LRUCache::new(max_memory);
        cache.on_evicted = Some(on_evicted);

        cache
    }

    /// Stores the given value for the given key.
    ///
    /// The entry becomes the most recently used one. If the key was already present, its value is
    /// replaced and the allocated memory is corrected by the size difference. Afterwards, least
    /// recently used entries are evicted until the cache is within its **max_memory** again. Note
    /// that an entry which is larger than the whole cache is therefore evicted right away.
    pub fn put(&mut self, key: String, value: V) {
        let mem_size = key.len() + value.allocated_size();
        let key_len = key.len();

        // Inserting an existing key moves it to the end (most recently used) of the map...
        match self.map.insert(key, value) {
            Some(previous) => {
                self.allocated_memory =
                    self.allocated_memory + mem_size - (key_len + previous.allocated_size());
            }
            None => self.allocated_memory += mem_size,
        }

        self.writes += 1;
        self.enforce_constraints();
    }

    fn enforce_constraints(&mut self) {
        while self.max_memory > 0 && self.allocated_memory > self.max_memory {
            if self.remove_oldest().is_none() {
                break;
            }
        }
    }

    /// Returns the value which has previously been stored for the given key or **None** if
    /// no value is present.
    ///
    /// A successful lookup marks the entry as most recently used.
    ///
    /// # Examples
    /// ```
    /// # use peercache::lru::LRUCache;
    /// let mut lru = LRUCache::new(1024);
    /// lru.put("Tom".to_owned(), "630".to_owned());
    ///
    /// assert_eq!(lru.get("Tom").map(String::as_str), Some("630"));
    /// assert_eq!(lru.get("Lisa"), None);
    /// assert_eq!(lru.hits(), 1);
    ///```
    pub fn get(&mut self, key: &str) -> Option<&V> {
        self.reads += 1;

        match self.map.get_refresh(key) {
            Some(value) => {
                self.hits += 1;
                Some(&*value)
            }
            None => None,
        }
    }

    /// Determines if a value is present for the given key without touching its recency.
    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Removes the entry for the given key if present.
    ///
    /// Note that the eviction callback is not invoked for explicitly removed entries.
    ///
    /// # Examples
    /// ```
    /// # use peercache::lru::LRUCache;
    /// let mut lru = LRUCache::new(1024);
    ///
    /// lru.put("Sam".to_owned(), "567".to_owned());
    /// assert_eq!(lru.remove("Sam"), Some("567".to_owned()));
    /// assert_eq!(lru.remove("Sam"), None);
    /// assert_eq!(lru.allocated_memory(), 0);
    /// ```
    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.writes += 1;

        let value = self.map.remove(key)?;
        self.allocated_memory -= key.len() + value.allocated_size();

        Some(value)
    }

    /// Evicts the least recently used entry.
    ///
    /// Returns the key and value of the evicted entry or **None** if the cache was empty. If an
    /// eviction callback is present, it is invoked with the key and value of the evicted entry.
    pub fn remove_oldest(&mut self) -> Option<(String, V)> {
        let (key, value) = self.map.pop_front()?;
        self.allocated_memory -= key.len() + value.allocated_size();
        self.evictions += 1;

        if let Some(callback) = self.on_evicted.as_mut() {
            callback(&key, &value);
        }

        Some((key, value))
    }

    /// Removes all entries in this cache.
    ///
    /// Note that this will also zero all metrics (reads, writes, cache hits, evictions).
    pub fn flush(&mut self) {
        self.map.clear();
        self.allocated_memory = 0;
        self.reads = 0;
        self.writes = 0;
        self.hits = 0;
        self.evictions = 0;
    }

    /// Returns the number of elements in the cache.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Determines if the cache is completely empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the maximal amount of memory to be occupied by this cache (0 = unlimited).
    pub fn max_memory(&self) -> usize {
        self.max_memory
    }

    /// Specifies the maximal amount of memory to be occupied by this cache.
    ///
    /// If the limit is lowered, superfluous entries are evicted immediately.
    ///
    /// # Examples
    /// ```
    /// # use peercache::lru::LRUCache;
    /// let mut lru = LRUCache::new(0);
    /// for day in ["mon", "tue", "wed", "thu"] {
    ///     lru.put(day.to_owned(), "sunny".to_owned());
    /// }
    /// assert_eq!(lru.allocated_memory(), 32);
    ///
    /// // Only the two most recent forecasts fit into 16 bytes...
    /// lru.set_max_memory(16);
    /// assert_eq!(lru.len(), 2);
    /// assert_eq!(lru.get("tue"), None);
    /// assert_eq!(lru.get("thu").is_some(), true);
    /// ```
    pub fn set_max_memory(&mut self, max_memory: usize) {
        self.max_memory = max_memory;
        self.enforce_constraints();
    }

    /// Returns the amount of memory allocated to store the keys and values of this cache.
    pub fn allocated_memory(&self) -> usize {
        self.allocated_memory
    }

    /// Returns the cache hit rate in percent.
    ///
    /// Note that all metrics are reset when **flush()** is called.
    pub fn hit_rate(&self) -> f32 {
        match self.reads {
            0 => 0.,
            n => self.hits as f32 / n as f32 * 100.,
        }
    }

    /// Returns the total number of reads performed on this cache since the last flush.
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Returns the number of reads which found a value.
    pub fn hits(&self) -> usize {
        self.hits
    }

    /// Returns the total number of writes performed on this cache since the last flush.
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Returns the number of entries evicted to enforce the memory limit.
    pub fn evictions(&self) -> usize {
        self.evictions
    }
}

#[cfg(test)]
mod tests {
    use crate::lru::LRUCache;
    use std::sync::{Arc, Mutex};

    #[test]
    fn max_memory_is_enforced() {
        // Each score takes 6 bytes: a name of three letters and a value of three digits...
        let mut lru = LRUCache::new(6 * 4);
        lru.put("Tom".to_owned(), "630".to_owned());
        lru.put("Sam".to_owned(), "567".to_owned());
        lru.put("Ann".to_owned(), "712".to_owned());
        lru.put("Bob".to_owned(), "498".to_owned());
        assert_eq!(lru.len(), 4);
        assert_eq!(lru.allocated_memory(), 24);

        // A shorter value releases the difference and makes Sam the most recent entry...
        lru.put("Sam".to_owned(), "9".to_owned());
        assert_eq!(lru.allocated_memory(), 22);

        assert_eq!(lru.remove("Ann"), Some("712".to_owned()));
        assert_eq!(lru.allocated_memory(), 16);

        // Jacky needs 9 bytes, therefore Tom as the oldest entry is dropped...
        lru.put("Jacky".to_owned(), "1589".to_owned());
        assert_eq!(lru.len(), 3);
        assert_eq!(lru.allocated_memory(), 19);
        assert_eq!(lru.contains_key("Tom"), false);
        assert_eq!(lru.get("Bob").map(String::as_str), Some("498"));
        assert_eq!(lru.get("Sam").map(String::as_str), Some("9"));
        assert_eq!(lru.evictions(), 1);
    }

    #[test]
    fn least_recently_used_entry_is_evicted() {
        // The cache holds exactly two entries of 2 bytes each...
        let mut lru = LRUCache::new(4);
        lru.put("A".to_owned(), "1".to_owned());
        lru.put("B".to_owned(), "2".to_owned());

        // Reading A makes B the least recently used entry...
        assert_eq!(lru.get("A").unwrap(), "1");
        lru.put("C".to_owned(), "3".to_owned());

        assert_eq!(lru.get("B"), None);
        assert_eq!(lru.get("A").unwrap(), "1");
        assert_eq!(lru.get("C").unwrap(), "3");
    }

    #[test]
    fn usage_never_exceeds_the_limit() {
        let mut lru = LRUCache::new(100);
        for i in 0..500 {
            let key = format!("key-{}", i % 37);
            let value = "x".repeat(i % 23);
            lru.put(key.clone(), value);
            assert!(lru.allocated_memory() <= 100);

            if i % 3 == 0 {
                let _ = lru.get(&format!("key-{}", i % 11));
            }
            assert!(lru.allocated_memory() <= 100);
        }
    }

    #[test]
    fn oversized_entries_do_not_stick() {
        let mut lru = LRUCache::new(10);
        lru.put("a".to_owned(), "b".to_owned());
        lru.put("big".to_owned(), "X".repeat(64));

        assert_eq!(lru.len(), 0);
        assert_eq!(lru.allocated_memory(), 0);
    }

    #[test]
    fn zero_means_unlimited() {
        let mut lru = LRUCache::new(0);
        for i in 0..1000 {
            lru.put(format!("{}", i), "X".repeat(100));
        }

        assert_eq!(lru.len(), 1000);
        assert_eq!(lru.evictions(), 0);
    }

    #[test]
    fn eviction_callback_receives_evicted_entries() {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let sink = evicted.clone();
        let mut lru = LRUCache::with_eviction_callback(
            "key1".len() + "key2".len() + "value1".len() + "value2".len(),
            Box::new(move |key: &str, value: &String| {
                sink.lock().unwrap().push((key.to_owned(), value.clone()));
            }),
        );

        lru.put("key1".to_owned(), "value1".to_owned());
        lru.put("key2".to_owned(), "value2".to_owned());
        lru.put("k3".to_owned(), "v3".to_owned());
        lru.put("k4".to_owned(), "v4".to_owned());

        assert_eq!(
            *evicted.lock().unwrap(),
            vec![("key1".to_owned(), "value1".to_owned())]
        );

        // Explicit removals are not reported...
        let _ = lru.remove("k3");
        assert_eq!(evicted.lock().unwrap().len(), 1);
    }

    #[test]
    fn hits_and_misses_are_counted() {
        let mut lru = LRUCache::new(64);
        for name in ["Tom", "Jack", "Sam"] {
            lru.put(name.to_owned(), "0".to_owned());
        }

        assert_eq!(lru.get("Tom").is_some(), true);
        assert_eq!(lru.get("Lisa").is_none(), true);
        assert_eq!(lru.get("Sam").is_some(), true);
        assert_eq!(lru.get("Mia").is_none(), true);

        assert_eq!(lru.writes(), 3);
        assert_eq!(lru.reads(), 4);
        assert_eq!(lru.hits(), 2);
        assert_eq!(lru.hit_rate().round() as i32, 50);
        assert_eq!(lru.allocated_memory(), 13);

        // Flushing drops all entries along with the counters...
        lru.flush();
        assert_eq!(lru.is_empty(), true);
        assert_eq!(lru.reads(), 0);
        assert_eq!(lru.hits(), 0);
        assert_eq!(lru.allocated_memory(), 0);
    }
}
