//! Provides duplicate suppression for concurrent computations of the same key.
//!
//! If many callers miss the cache for the same key at the same time, we only want to run the
//! (most probably expensive) computation once. The first caller therefore registers its
//! computation as a shared future. All callers which arrive while this future is still pending
//! simply await the same future and therefore observe exactly the same result. Once the
//! computation has completed, its record is removed so that the next caller will run a fresh
//! computation. Note that this is not a cache: results are never kept beyond the lifetime of the
//! in-flight computation.
//!
//! If all callers waiting for a computation are cancelled, the pending record stays in place and
//! is driven to completion by the next caller for this key.
//!
//! # Example
//! ```
//! # use peercache::singleflight::SingleFlight;
//! # #[tokio::main]
//! # async fn main() {
//! let flight = SingleFlight::new();
//! let (a, b) = tokio::join!(
//!     flight.run("Tom", || async { 630 }),
//!     flight.run("Tom", || async { 42 })
//! );
//!
//! // The second caller joined the computation of the first one...
//! assert_eq!((a, b), (630, 630));
//! # }
//! ```
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};

type SharedCall<T> = Shared<BoxFuture<'static, T>>;

/// Represents an in-flight computation.
struct Call<T: Clone> {
    id: u64,
    future: SharedCall<T>,
}

/// Executes computations so that only one is in-flight per key at any given time.
///
/// The result type has to be **Clone**, as each caller receives its own copy of the shared
/// result.
pub struct SingleFlight<T: Clone> {
    calls: Mutex<HashMap<String, Call<T>>>,
    next_id: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> Default for SingleFlight<T> {
    fn default() -> Self {
        SingleFlight::new()
    }
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    /// Creates a new instance without any in-flight computations.
    pub fn new() -> Self {
        SingleFlight {
            calls: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<HashMap<String, Call<T>>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs the computation created by **task** unless a computation for the same key is
    /// already in-flight, in which case the result of that computation is awaited and returned.
    ///
    /// Note that **task** is invoked while the registry is locked. It should therefore only
    /// create the future (e.g. by returning an `async` block) and leave all the work to it.
    pub async fn run<F, Fut>(&self, key: &str, task: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (id, call) = self.join_or_start(key, task);
        let result = call.await;
        self.complete(key, id);

        result
    }

    fn join_or_start<F, Fut>(&self, key: &str, task: F) -> (u64, SharedCall<T>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut calls = self.lock();

        // A record which already carries a result is only left over if its callers completed
        // without being able to clean up. Such a record must not be used as a cached value...
        if let Some(call) = calls.get(key).filter(|call| call.future.peek().is_none()) {
            log::debug!("Joining in-flight computation for {}...", key);
            return (call.id, call.future.clone());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let future = task().boxed().shared();
        let _ = calls.insert(
            key.to_owned(),
            Call {
                id,
                future: future.clone(),
            },
        );

        (id, future)
    }

    /// Removes the record of the given computation unless it has already been replaced.
    fn complete(&self, key: &str, id: u64) {
        let mut calls = self.lock();
        if calls.get(key).map(|call| call.id == id).unwrap_or(false) {
            let _ = calls.remove(key);
        }
    }

    /// Returns the number of computations which are currently in-flight.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }
}
