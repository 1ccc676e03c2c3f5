//! Provides the container which keeps all central components of a node.
//!
//! The platform owns the [Groups] registry and the [Config], both of which are always present.
//! The [HttpPool] and the [Server] are optional and are installed by the
//! [Builder](crate::builder::Builder) if enabled. Also this keeps the central **is_running**
//! flag which is toggled to *false* once [Platform::terminate](Platform::terminate) is invoked.
//!
//! Note that once the platform is terminated, the pool and the server are released so that all
//! tasks which keep them around can wind down. Therefore code which might run after
//! [Platform::terminate](Platform::terminate) should use [find_pool](Platform::find_pool) and
//! gracefully handle the **None** case.
//!
//! # Examples
//!
//! ```
//! # use peercache::platform::Platform;
//! # use peercache::group::GetterFunc;
//! let platform = Platform::new();
//!
//! // Groups are registered in the registry of the platform...
//! let _ = platform.create_group("scores", 1024, GetterFunc(|key: String| async move {
//!     let value: anyhow::Result<Vec<u8>> = Ok(key.into_bytes());
//!     value
//! }));
//! assert_eq!(platform.groups().get("scores").is_some(), true);
//!
//! // By default the platform is running...
//! assert_eq!(platform.is_running(), true);
//!
//! // Once terminated...
//! platform.terminate();
//!
//! // ...the platform is no longer considered active.
//! assert_eq!(platform.is_running(), false);
//! ```
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::Config;
use crate::group::{Getter, Group, Groups};
use crate::http::HttpPool;
use crate::server::Server;

/// Contains the file from which the config is loaded.
pub const CONFIG_FILE: &str = "config/settings.yml";

/// Provides a container to keep all central components of a node in a single place.
pub struct Platform {
    groups: Arc<Groups>,
    config: Arc<Config>,
    pool: Mutex<Option<Arc<HttpPool>>>,
    server: Mutex<Option<Arc<Server>>>,
    is_running: AtomicBool,
}

fn lock<T>(slot: &Mutex<Option<Arc<T>>>) -> MutexGuard<Option<Arc<T>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Platform {
    /// Creates a new platform with an empty registry and an empty config.
    pub fn new() -> Arc<Self> {
        Arc::new(Platform {
            groups: Arc::new(Groups::new()),
            config: Arc::new(Config::new(CONFIG_FILE)),
            pool: Mutex::new(None),
            server: Mutex::new(None),
            is_running: AtomicBool::new(true),
        })
    }

    /// Provides access to the registry of all groups of this node.
    pub fn groups(&self) -> &Arc<Groups> {
        &self.groups
    }

    /// Provides access to the system configuration.
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Creates a new group and connects it to the peers of this node (if an [HttpPool] is
    /// installed).
    ///
    /// See [Groups::create](Groups::create) for details.
    pub fn create_group(
        &self,
        name: &str,
        max_memory: usize,
        getter: impl Getter + 'static,
    ) -> Arc<Group> {
        let group = self.groups.create(name, max_memory, getter);
        if let Some(pool) = self.find_pool() {
            group.register_peers(pool);
        }

        group
    }

    /// Installs the given pool.
    pub fn register_pool(&self, pool: Arc<HttpPool>) {
        *lock(&self.pool) = Some(pool);
    }

    /// Returns the installed pool if present.
    pub fn find_pool(&self) -> Option<Arc<HttpPool>> {
        lock(&self.pool).clone()
    }

    /// Returns the installed pool.
    ///
    /// # Panics
    /// Panics if no pool is installed or if the platform has already been terminated.
    pub fn require_pool(&self) -> Arc<HttpPool> {
        match self.find_pool() {
            Some(pool) => pool,
            None => panic!("No HttpPool is available in the platform!"),
        }
    }

    /// Installs the given server.
    pub fn register_server(&self, server: Arc<Server>) {
        *lock(&self.server) = Some(server);
    }

    /// Returns the installed server.
    ///
    /// # Panics
    /// Panics if no server is installed or if the platform has already been terminated.
    pub fn require_server(&self) -> Arc<Server> {
        match lock(&self.server).clone() {
            Some(server) => server,
            None => panic!("No Server is available in the platform!"),
        }
    }

    /// Determines if the platform is still running or if [Platform::terminate](Platform::terminate)
    /// has already been called.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Terminates the platform.
    ///
    /// This toggles the [is_running()](Platform::is_running) flag to **false** and releases the
    /// pool and the server.
    pub fn terminate(&self) {
        self.is_running.store(false, Ordering::Release);

        let _ = lock(&self.server).take();
        let _ = lock(&self.pool).take();
    }
}
