//! Provides named cache namespaces which are filled by a loader on demand.
//!
//! A [Group] is the main entry point of the library. It binds a name, a loader ([Getter]), a
//! local [Cache] and optionally a [PeerPicker] together. Upon a lookup, the local cache is
//! consulted first. On a miss, the value is either fetched from the peer which owns the key or
//! computed by the loader. In the latter case the value is stored in the local cache. Values
//! fetched from a peer are not stored locally, as the owning peer already caches them.
//!
//! All misses of the same key are collapsed by a [SingleFlight] so that the loader (or the
//! owning peer) is only asked once, no matter how many callers are waiting for the value.
//!
//! Groups are created and resolved via a [Groups] registry which is most probably owned by the
//! [Platform](crate::platform::Platform).
//!
//! # Example
//! ```
//! # use peercache::group::{Groups, GetterFunc};
//! # #[tokio::main]
//! # async fn main() {
//! let groups = Groups::new();
//! let scores = groups.create(
//!     "scores",
//!     2048,
//!     GetterFunc(|key: String| async move {
//!         let value: anyhow::Result<Vec<u8>> = Ok(format!("score of {}", key).into_bytes());
//!         value
//!     }),
//! );
//!
//! let value = scores.get("Tom").await.unwrap();
//! assert_eq!(value.to_string(), "score of Tom");
//!
//! // The group can be resolved by its name later on...
//! assert_eq!(groups.get("scores").unwrap().name(), "scores");
//! # }
//! ```
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::byteview::ByteView;
use crate::error::{CacheError, Result};
use crate::fmt::format_size;
use crate::lru::cache::{Cache, CacheStats};
use crate::peers::{PeerGetter, PeerPicker};
use crate::singleflight::SingleFlight;

const SEPARATOR: &str =
    "-------------------------------------------------------------------------------\n";

/// Loads the value of a key if it isn't present in the cache.
///
/// This is the callback provided by the application. Note that [GetterFunc] permits to use a
/// plain closure instead of implementing this trait.
#[async_trait]
pub trait Getter: Send + Sync {
    /// Loads the value of the given key.
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>>;
}

/// Adapts a closure which returns a future into a [Getter].
pub struct GetterFunc<F>(pub F);

#[async_trait]
impl<F, Fut> Getter for GetterFunc<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<u8>>> + Send + 'static,
{
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        (self.0)(key.to_owned()).await
    }
}

/// Provides a snapshot of the metrics of a group.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GroupStats {
    /// Contains the number of lookups (including those with an empty key).
    pub gets: usize,

    /// Contains the number of lookups served by the local cache.
    pub cache_hits: usize,

    /// Contains the number of loads after collapsing concurrent misses.
    pub loads: usize,

    /// Contains the number of values successfully fetched from a peer.
    pub peer_loads: usize,

    /// Contains the number of failed fetches from a peer.
    pub peer_errors: usize,

    /// Contains the number of loader invocations.
    pub local_loads: usize,

    /// Contains the number of failed loader invocations.
    pub local_load_errors: usize,
}

#[derive(Default)]
struct Counters {
    gets: AtomicUsize,
    cache_hits: AtomicUsize,
    loads: AtomicUsize,
    peer_loads: AtomicUsize,
    peer_errors: AtomicUsize,
    local_loads: AtomicUsize,
    local_load_errors: AtomicUsize,
}

fn increment(counter: &AtomicUsize) {
    let _ = counter.fetch_add(1, Ordering::Relaxed);
}

/// Represents a named cache namespace.
pub struct Group {
    name: String,
    getter: Arc<dyn Getter>,
    main_cache: Cache,
    peers: OnceLock<Arc<dyn PeerPicker>>,
    loader: SingleFlight<Result<ByteView>>,
    counters: Counters,
}

impl Group {
    fn new(name: &str, max_memory: usize, getter: Arc<dyn Getter>) -> Self {
        Group {
            name: name.to_owned(),
            getter,
            main_cache: Cache::new(max_memory),
            peers: OnceLock::new(),
            loader: SingleFlight::new(),
            counters: Counters::default(),
        }
    }

    /// Returns the name of this group.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers the picker used to determine the owning peer of a key.
    ///
    /// # Panics
    /// Panics if peers have already been registered for this group.
    pub fn register_peers(&self, peers: Arc<dyn PeerPicker>) {
        if self.peers.set(peers).is_err() {
            panic!(
                "Peers have already been registered for the group '{}'!",
                self.name
            );
        }
    }

    /// Resolves the value of the given key.
    ///
    /// Returns the cached value if present. Otherwise the value is fetched from the owning
    /// peer or computed by the loader.
    pub async fn get(self: &Arc<Self>, key: &str) -> Result<ByteView> {
        self.lookup(key, None).await
    }

    /// Resolves the value of the given key just like [get](Group::get) but gives up once the
    /// given timeout has elapsed.
    ///
    /// The deadline is also applied to the loader and to the fetch from a peer. A caller which
    /// joins a computation that is already in-flight is bound by its own deadline while
    /// waiting. If the joined computation runs into the (earlier) deadline of the caller which
    /// started it, the joining caller starts a new computation instead of reporting a timeout
    /// it never asked for.
    pub async fn get_with_timeout(
        self: &Arc<Self>,
        key: &str,
        timeout: Duration,
    ) -> Result<ByteView> {
        let deadline = Instant::now() + timeout;
        match tokio::time::timeout_at(deadline, self.lookup(key, Some(deadline))).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout),
        }
    }

    async fn lookup(self: &Arc<Self>, key: &str, deadline: Option<Instant>) -> Result<ByteView> {
        increment(&self.counters.gets);
        if key.is_empty() {
            return Err(CacheError::KeyRequired);
        }

        loop {
            if let Some(value) = self.main_cache.get(key) {
                log::debug!("[{}] Cache hit for {}", self.name, key);
                increment(&self.counters.cache_hits);
                return Ok(value);
            }

            let group = self.clone();
            let owned_key = key.to_owned();
            let result = self
                .loader
                .run(key, move || async move {
                    group.load(&owned_key, deadline).await
                })
                .await;

            match result {
                Err(CacheError::Timeout) if !has_expired(deadline) => {
                    log::debug!(
                        "[{}] Joined load of {} ran into a foreign deadline. Retrying...",
                        self.name,
                        key
                    );
                }
                result => return result,
            }
        }
    }

    async fn load(&self, key: &str, deadline: Option<Instant>) -> Result<ByteView> {
        increment(&self.counters.loads);

        if let Some(peer) = self.peers.get().and_then(|picker| picker.pick_peer(key)) {
            match self.get_from_peer(peer.as_ref(), key, deadline).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    increment(&self.counters.peer_errors);
                    log::warn!(
                        "[{}] Failed to fetch {} from its peer: {}. Loading it locally...",
                        self.name,
                        key,
                        error
                    );
                }
            }
        }

        self.get_locally(key, deadline).await
    }

    async fn get_from_peer(
        &self,
        peer: &dyn PeerGetter,
        key: &str,
        deadline: Option<Instant>,
    ) -> Result<ByteView> {
        let bytes = with_deadline(deadline, peer.get(&self.name, key)).await??;
        increment(&self.counters.peer_loads);

        Ok(ByteView::from(bytes))
    }

    async fn get_locally(&self, key: &str, deadline: Option<Instant>) -> Result<ByteView> {
        increment(&self.counters.local_loads);
        let bytes = match with_deadline(deadline, self.getter.get(key)).await? {
            Ok(bytes) => bytes,
            Err(error) => {
                increment(&self.counters.local_load_errors);
                return Err(CacheError::loader(error));
            }
        };

        let value = ByteView::from(bytes);
        self.main_cache.add(key, value.clone());

        Ok(value)
    }

    /// Returns the metrics of the local cache of this group.
    pub fn cache_stats(&self) -> CacheStats {
        self.main_cache.stats()
    }

    /// Returns the metrics of this group.
    pub fn stats(&self) -> GroupStats {
        let counters = &self.counters;
        GroupStats {
            gets: counters.gets.load(Ordering::Relaxed),
            cache_hits: counters.cache_hits.load(Ordering::Relaxed),
            loads: counters.loads.load(Ordering::Relaxed),
            peer_loads: counters.peer_loads.load(Ordering::Relaxed),
            peer_errors: counters.peer_errors.load(Ordering::Relaxed),
            local_loads: counters.local_loads.load(Ordering::Relaxed),
            local_load_errors: counters.local_load_errors.load(Ordering::Relaxed),
        }
    }
}

fn has_expired(deadline: Option<Instant>) -> bool {
    deadline
        .map(|deadline| Instant::now() >= deadline)
        .unwrap_or(false)
}

async fn with_deadline<F: Future>(deadline: Option<Instant>, future: F) -> Result<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, future)
            .await
            .map_err(|_| CacheError::Timeout),
        None => Ok(future.await),
    }
}

/// Keeps all groups of a node by their name.
///
/// Lookups can be performed concurrently, creating a group requires exclusive access.
#[derive(Default)]
pub struct Groups {
    groups: RwLock<HashMap<String, Arc<Group>>>,
}

impl Groups {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Groups::default()
    }

    /// Creates a new group and registers it under the given name.
    ///
    /// The local cache of the group will hold up to **max_memory** bytes (0 = unlimited). Note
    /// that an existing group of the same name is replaced.
    pub fn create(
        &self,
        name: &str,
        max_memory: usize,
        getter: impl Getter + 'static,
    ) -> Arc<Group> {
        let group = Arc::new(Group::new(name, max_memory, Arc::new(getter)));
        let previous = self
            .groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_owned(), group.clone());

        if previous.is_some() {
            log::info!("Replaced the group '{}'.", name);
        } else {
            log::info!("Created the group '{}' ({}).", name, format_size(max_memory));
        }

        group
    }

    /// Resolves the group with the given name.
    pub fn get(&self, name: &str) -> Option<Arc<Group>> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Lists the names of all known groups in alphabetical order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();

        names
    }

    /// Renders the metrics of all groups as a table.
    pub fn report(&self) -> String {
        let mut result = String::new();

        for name in self.names() {
            let group = match self.get(&name) {
                Some(group) => group,
                None => continue,
            };
            let cache = group.cache_stats();
            let stats = group.stats();
            let hit_rate = if cache.reads > 0 {
                cache.hits as f32 / cache.reads as f32 * 100.
            } else {
                0.
            };

            result += format!("Group: {}\n", name).as_str();
            result += SEPARATOR;
            result += format!("{:<30} {:>20}\n", "Num Entries", cache.entries).as_str();
            result += format!(
                "{:<30} {:>20}\n",
                "Allocated Memory",
                format_size(cache.allocated_memory)
            )
            .as_str();
            result += format!("{:<30} {:>20}\n", "Max Memory", format_size(cache.max_memory))
                .as_str();
            result += format!("{:<30} {:>20}\n", "Evictions", cache.evictions).as_str();
            result += format!("{:<30} {:>18.2} %\n", "Hit Rate", hit_rate).as_str();
            result += format!("{:<30} {:>20}\n", "Gets", stats.gets).as_str();
            result += format!("{:<30} {:>20}\n", "Loads", stats.loads).as_str();
            result += format!("{:<30} {:>20}\n", "Peer Loads", stats.peer_loads).as_str();
            result += format!("{:<30} {:>20}\n", "Peer Errors", stats.peer_errors).as_str();
            result += format!("{:<30} {:>20}\n", "Local Loads", stats.local_loads).as_str();
            result += format!(
                "{:<30} {:>20}\n",
                "Local Load Errors", stats.local_load_errors
            )
            .as_str();
            result += SEPARATOR;
            result += "\n";
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{CacheError, Result};
    use crate::group::{Getter, GetterFunc, Groups};
    use crate::peers::{PeerGetter, PeerPicker};
    use crate::testing::test_async;
    use async_trait::async_trait;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Creates a slow loader which counts its invocations and yields "value of KEY".
    fn counting_loader(invocations: Arc<AtomicUsize>) -> impl Getter {
        GetterFunc(move |key: String| {
            let invocations = invocations.clone();
            async move {
                let _ = invocations.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                let value: anyhow::Result<Vec<u8>> = Ok(format!("value of {}", key).into_bytes());
                value
            }
        })
    }

    /// Always answers with the same result and counts how often it was asked.
    struct StaticPeer {
        result: Result<Vec<u8>>,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl PeerGetter for StaticPeer {
        async fn get(&self, _group: &str, _key: &str) -> Result<Vec<u8>> {
            let _ = self.fetches.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    struct StaticPicker(Arc<StaticPeer>);

    impl PeerPicker for StaticPicker {
        fn pick_peer(&self, _key: &str) -> Option<Arc<dyn PeerGetter>> {
            let peer: Arc<dyn PeerGetter> = self.0.clone();
            Some(peer)
        }
    }

    /// Takes half a second to answer any request.
    struct SlowPeer {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl PeerGetter for SlowPeer {
        async fn get(&self, _group: &str, _key: &str) -> Result<Vec<u8>> {
            let _ = self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(b"remote".to_vec())
        }
    }

    struct SlowPicker(Arc<SlowPeer>);

    impl PeerPicker for SlowPicker {
        fn pick_peer(&self, _key: &str) -> Option<Arc<dyn PeerGetter>> {
            let peer: Arc<dyn PeerGetter> = self.0.clone();
            Some(peer)
        }
    }

    #[test]
    fn empty_keys_are_rejected() {
        test_async(async {
            let invocations = Arc::new(AtomicUsize::new(0));
            let group = Groups::new().create("test", 1024, counting_loader(invocations.clone()));

            match group.get("").await {
                Err(CacheError::KeyRequired) => (),
                _ => panic!("An empty key must be rejected!"),
            }
            assert_eq!(invocations.load(Ordering::SeqCst), 0);
        });
    }

    #[test]
    fn loaded_values_are_cached() {
        test_async(async {
            let invocations = Arc::new(AtomicUsize::new(0));
            let group = Groups::new().create("test", 1024, counting_loader(invocations.clone()));

            assert_eq!(group.get("Tom").await.unwrap().to_string(), "value of Tom");
            assert_eq!(group.get("Tom").await.unwrap().to_string(), "value of Tom");

            assert_eq!(invocations.load(Ordering::SeqCst), 1);
            assert_eq!(group.stats().cache_hits, 1);
            assert_eq!(group.stats().local_loads, 1);
            assert_eq!(group.cache_stats().entries, 1);
        });
    }

    #[test]
    fn concurrent_misses_invoke_the_loader_once() {
        test_async(async {
            let invocations = Arc::new(AtomicUsize::new(0));
            let counter = invocations.clone();
            let group = Groups::new().create(
                "test",
                1024,
                GetterFunc(move |_key: String| {
                    let counter = counter.clone();
                    async move {
                        let _ = counter.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        let value: anyhow::Result<Vec<u8>> = Ok(b"V".to_vec());
                        value
                    }
                }),
            );

            let results = join_all((0..50).map(|_| group.get("K"))).await;

            assert_eq!(invocations.load(Ordering::SeqCst), 1);
            assert_eq!(results.len(), 50);
            for result in results {
                assert_eq!(result.unwrap().byte_slice(), b"V".to_vec());
            }
            assert_eq!(group.stats().loads, 1);
        });
    }

    #[test]
    fn loader_errors_are_reported_and_not_cached() {
        test_async(async {
            let invocations = Arc::new(AtomicUsize::new(0));
            let counter = invocations.clone();
            let group = Groups::new().create(
                "test",
                1024,
                GetterFunc(move |key: String| {
                    let _ = counter.fetch_add(1, Ordering::SeqCst);
                    async move {
                        let value: anyhow::Result<Vec<u8>> =
                            Err(anyhow::anyhow!("{} does not exist", key));
                        value
                    }
                }),
            );

            assert_eq!(
                group.get("Unknown").await.unwrap_err().to_string(),
                "Unknown does not exist"
            );
            assert_eq!(group.get("Unknown").await.is_err(), true);

            assert_eq!(invocations.load(Ordering::SeqCst), 2);
            assert_eq!(group.stats().local_load_errors, 2);
            assert_eq!(group.cache_stats().entries, 0);
        });
    }

    #[test]
    #[should_panic]
    fn registering_peers_twice_panics() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let group = Groups::new().create("test", 1024, counting_loader(invocations));
        let peer = Arc::new(StaticPeer {
            result: Ok(Vec::new()),
            fetches: AtomicUsize::new(0),
        });

        group.register_peers(Arc::new(StaticPicker(peer.clone())));
        group.register_peers(Arc::new(StaticPicker(peer)));
    }

    #[test]
    fn failing_peers_fall_back_to_the_loader() {
        test_async(async {
            let invocations = Arc::new(AtomicUsize::new(0));
            let group = Groups::new().create("test", 1024, counting_loader(invocations.clone()));
            let peer = Arc::new(StaticPeer {
                result: Err(CacheError::transport("connection refused")),
                fetches: AtomicUsize::new(0),
            });
            group.register_peers(Arc::new(StaticPicker(peer.clone())));

            assert_eq!(group.get("Tom").await.unwrap().to_string(), "value of Tom");

            // Exactly one attempt is made before falling back...
            assert_eq!(peer.fetches.load(Ordering::SeqCst), 1);
            assert_eq!(invocations.load(Ordering::SeqCst), 1);
            assert_eq!(group.stats().peer_errors, 1);

            // ..and the locally loaded value is cached.
            assert_eq!(group.cache_stats().entries, 1);
        });
    }

    #[test]
    fn values_of_peers_are_not_cached_locally() {
        test_async(async {
            let invocations = Arc::new(AtomicUsize::new(0));
            let group = Groups::new().create("test", 1024, counting_loader(invocations.clone()));
            let peer = Arc::new(StaticPeer {
                result: Ok(b"remote".to_vec()),
                fetches: AtomicUsize::new(0),
            });
            group.register_peers(Arc::new(StaticPicker(peer.clone())));

            assert_eq!(group.get("Tom").await.unwrap().to_string(), "remote");
            assert_eq!(group.get("Tom").await.unwrap().to_string(), "remote");

            assert_eq!(peer.fetches.load(Ordering::SeqCst), 2);
            assert_eq!(invocations.load(Ordering::SeqCst), 0);
            assert_eq!(group.stats().peer_loads, 2);
            assert_eq!(group.cache_stats().entries, 0);
        });
    }

    #[test]
    fn slow_loaders_run_into_the_deadline() {
        test_async(async {
            let group = Groups::new().create(
                "test",
                1024,
                GetterFunc(|_key: String| async {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    let value: anyhow::Result<Vec<u8>> = Ok(b"late".to_vec());
                    value
                }),
            );

            match group.get_with_timeout("Tom", Duration::from_millis(20)).await {
                Err(CacheError::Timeout) => (),
                _ => panic!("Expected a timeout!"),
            }
            assert_eq!(group.cache_stats().entries, 0);

            // Fast enough lookups are not affected...
            let invocations = Arc::new(AtomicUsize::new(0));
            let fast = Groups::new().create("fast", 1024, counting_loader(invocations));
            assert_eq!(
                fast.get_with_timeout("Tom", Duration::from_secs(5))
                    .await
                    .unwrap()
                    .to_string(),
                "value of Tom"
            );
        });
    }

    #[test]
    fn deadlines_only_bind_the_callers_which_requested_them() {
        test_async(async {
            let invocations = Arc::new(AtomicUsize::new(0));
            let counter = invocations.clone();
            let group = Groups::new().create(
                "test",
                1024,
                GetterFunc(move |_key: String| {
                    let counter = counter.clone();
                    async move {
                        let _ = counter.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        let value: anyhow::Result<Vec<u8>> = Ok(b"V".to_vec());
                        value
                    }
                }),
            );

            // The first caller starts the load, the second one joins it...
            let (bounded, unbounded) = tokio::join!(
                group.get_with_timeout("K", Duration::from_millis(20)),
                group.get("K")
            );

            match bounded {
                Err(CacheError::Timeout) => (),
                _ => panic!("Expected a timeout!"),
            }
            assert_eq!(unbounded.unwrap().to_string(), "V");

            // ..and has to restart it once the first caller gave up.
            assert_eq!(invocations.load(Ordering::SeqCst), 2);
            assert_eq!(group.cache_stats().entries, 1);
        });
    }

    #[test]
    fn slow_peers_run_into_the_deadline() {
        test_async(async {
            let invocations = Arc::new(AtomicUsize::new(0));
            let group = Groups::new().create("test", 1024, counting_loader(invocations));
            let peer = Arc::new(SlowPeer {
                fetches: AtomicUsize::new(0),
            });
            group.register_peers(Arc::new(SlowPicker(peer.clone())));

            // The peer fetch is aborted and counted as failure. The local fallback shares the
            // already elapsed deadline and therefore times out as well...
            match group.get_with_timeout("Tom", Duration::from_millis(50)).await {
                Err(CacheError::Timeout) => (),
                _ => panic!("Expected a timeout!"),
            }
            assert_eq!(peer.fetches.load(Ordering::SeqCst), 1);
            assert_eq!(group.stats().peer_errors, 1);
            assert_eq!(group.stats().peer_loads, 0);
            assert_eq!(group.cache_stats().entries, 0);
        });
    }

    #[test]
    fn groups_are_registered_by_name() {
        let groups = Groups::new();
        let invocations = Arc::new(AtomicUsize::new(0));

        let first = groups.create("scores", 1024, counting_loader(invocations.clone()));
        let _ = groups.create("names", 1024, counting_loader(invocations.clone()));
        assert_eq!(Arc::ptr_eq(&groups.get("scores").unwrap(), &first), true);
        assert_eq!(groups.get("unknown").is_none(), true);
        assert_eq!(groups.names(), vec!["names", "scores"]);

        // Creating a group with an existing name replaces the previous one...
        let second = groups.create("scores", 2048, counting_loader(invocations));
        assert_eq!(Arc::ptr_eq(&groups.get("scores").unwrap(), &second), true);
        assert_eq!(groups.get("scores").unwrap().cache_stats().max_memory, 2048);

        let report = groups.report();
        assert_eq!(report.contains("Group: names"), true);
        assert_eq!(report.contains("Group: scores"), true);
        assert_eq!(report.contains("2.00 KiB"), true);
    }
}
