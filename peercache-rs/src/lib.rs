//! Peercache is a distributed, read-through, in-memory cache for values which are expensive to
//! compute or to fetch.
//!
//! # Introduction
//! An application embeds **Peercache** and defines one or more [groups](group::Group). Each group
//! is a named namespace along with a loader which computes the value of a key if it isn't
//! present. Several processes (nodes) of the application know each other as **peers**. Using
//! [consistent hashing](consistenthash) each key is owned by exactly one node, so that a value
//! is only computed and cached by this node. Other nodes fetch it from the owner via HTTP.
//!
//! # Features
//! * **Memory bounded LRU caches**: Each group stores its values in a [cache](lru::cache) which
//!   evicts the least recently used entries once its memory limit is reached.
//! * **Duplicate suppression**: If many callers miss the same key at once, the loader (or the
//!   owning peer) is only asked once and all callers share the result (see [singleflight]).
//! * **Peer routing**: Keys are mapped onto nodes via a [hash ring](consistenthash::HashRing) with
//!   several virtual nodes per peer, so that adding or removing a peer only moves a fraction of
//!   all keys.
//! * **100% Async/Await**: The whole library builds upon [tokio](https://tokio.rs/) and
//!   [hyper](https://hyper.rs/).
//! * **Reload-aware config facility**: The set of peers as well as the server address can be
//!   changed during operation. Being an in-memory cache, we want to prevent restarts as these
//!   would discard all cached values.
//!
//! # Modules
//! * [byteview]: The immutable value type stored in the caches.
//! * [lru]: The memory bounded LRU cache and its thread safe wrapper.
//! * [consistenthash]: Maps keys onto peers.
//! * [singleflight]: Collapses concurrent computations of the same key.
//! * [group]: The main entry point which ties all of the above together.
//! * [http] and [server]: The transport used to fetch values from peers.
//!
//! # Examples
//! A short example on how to initialize the library can be found here [Builder](builder::Builder).
//! A runnable node can be found in the **peercache-io** crate.
#![deny(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces
)]
#![warn(unused_results)]
use simplelog::{format_description, ConfigBuilder, LevelFilter, SimpleLogger};
use std::sync::Once;

pub mod builder;
pub mod byteview;
pub mod config;
pub mod consistenthash;
pub mod error;
pub mod fmt;
pub mod group;
pub mod http;
pub mod lru;
pub mod peers;
pub mod platform;
pub mod server;
pub mod signals;
pub mod singleflight;

/// Contains the version of the Peercache library.
pub const PEERCACHE_VERSION: &str = "DEVELOPMENT-SNAPSHOT";

/// Contains the git commit hash of the Peercache build being used.
pub const PEERCACHE_REVISION: &str = "NO-REVISION";

/// Initializes the logging system.
///
/// Note that most probably the simplest way is to use a [Builder](builder::Builder) to set up the
/// framework, which will also set up logging if enabled.
pub fn init_logging() {
    static INIT_LOGGING: Once = Once::new();

    // Tests might initialize the logging system several times...
    INIT_LOGGING.call_once(|| {
        if let Err(error) = SimpleLogger::init(
            LevelFilter::Debug,
            ConfigBuilder::new()
                .set_time_format_custom(format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                ))
                .set_thread_level(LevelFilter::Trace)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Trace)
                .build(),
        ) {
            panic!("Failed to initialize logging system: {}", error);
        }
    });
}

/// Provides a simple macro to execute an async block within `tokio::spawn`.
///
/// Note that this also applies std::mem::drop on the returned handle to make
/// clippy happy.
///
/// # Example
/// ```rust
/// # #[macro_use] extern crate peercache;
/// # #[tokio::main]
/// # async fn main() {
/// spawn!(async move {
///     // perform some async stuff here...
/// });
/// # }
/// ```
#[macro_export]
macro_rules! spawn {
    ($e:expr) => {{
        std::mem::drop(tokio::spawn($e));
    }};
}

#[cfg(test)]
mod testing {
    use std::sync::Mutex;

    lazy_static::lazy_static! {
        /// Provides a global lock which has to be acquired if a test operates on shared
        /// resources. This is most probably one of our fixed test ports (1503 / 1504) on which
        /// we start a local server for integration tests. Using this lock, we can still execute
        /// all other tests in parallel and only block if required.
        pub static ref SHARED_TEST_RESOURCES: Mutex<()> = Mutex::new(());
    }

    /// Executes async code within a single threaded tokio runtime.
    pub fn test_async<F: std::future::Future>(future: F) {
        use tokio::runtime;

        let rt = runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let _ = rt.block_on(future);
    }
}
