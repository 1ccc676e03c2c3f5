//! Provides a builder which can be used to set up and initialize a cache node.
//!
//! # Example
//! Setting up a node with all features enabled:
//! ```no_run
//! # use peercache::builder::Builder;
//! # use peercache::group::GetterFunc;
//! #[tokio::main]
//! async fn main() {
//!     // Enable all features and build the platform...
//!     let platform = Builder::new().enable_all().build().await;
//!
//!     // Create the groups of this node...
//!     let _ = platform.create_group("scores", 64 * 1024 * 1024, GetterFunc(|key: String| async move {
//!         let value: anyhow::Result<Vec<u8>> = Ok(key.into_bytes());
//!         value
//!     }));
//!
//!     // Start the main event loop of the server...
//!     platform.require_server().event_loop().await;
//! }
//! ```
use std::sync::Arc;

use crate::platform::Platform;
use crate::{init_logging, PEERCACHE_REVISION, PEERCACHE_VERSION};

/// Initializes a node by creating and initializing all enabled components.
#[derive(Default)]
pub struct Builder {
    setup_logging: bool,
    enable_signals: bool,
    setup_config: bool,
    setup_server: bool,
}

impl Builder {
    /// Creates a new builder with all features disabled.
    pub fn new() -> Self {
        Builder::default()
    }

    /// Enables all features.
    ///
    /// Note that using this method (and then maybe disabling selected components) is quite
    /// convenient, but be aware that new components which might be added in a library update
    /// will then also be enabled by default.
    pub fn enable_all(mut self) -> Self {
        self.setup_logging = true;
        self.enable_signals = true;
        self.setup_config = true;
        self.setup_server = true;

        self
    }

    /// Enables the automatic setup of the logging system.
    ///
    /// Using this, we properly initialize **simplelog** to log to stdout.
    pub fn enable_logging(mut self) -> Self {
        self.setup_logging = true;
        self
    }

    /// Disables the automatic setup of the logging system after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_logging(mut self) -> Self {
        self.setup_logging = false;
        self
    }

    /// Installs a signal listener which terminates the platform once **CTRL-C**, **SIGHUP** or
    /// **SIGTERM** is received.
    ///
    /// For more details see: [signals](crate::signals)
    pub fn enable_signals(mut self) -> Self {
        self.enable_signals = true;
        self
    }

    /// Disables installing the signal listener after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_signals(mut self) -> Self {
        self.enable_signals = false;
        self
    }

    /// Loads **config/settings.yml** into the [Config](crate::config::Config) of the platform and
    /// watches it for changes.
    ///
    /// For more details see: [config](crate::config)
    pub fn enable_config(mut self) -> Self {
        self.setup_config = true;
        self
    }

    /// Disables loading the config after [enable_all()](Builder::enable_all) has been used.
    pub fn disable_config(mut self) -> Self {
        self.setup_config = false;
        self
    }

    /// Creates and installs an [HttpPool](crate::http::HttpPool) along with a
    /// [Server](crate::server::Server).
    ///
    /// Note that still, the main event loop has to be invoked manually via:
    /// `platform.require_server().event_loop().await`.
    pub fn enable_server(mut self) -> Self {
        self.setup_server = true;
        self
    }

    /// Disables setting up the pool and the server after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_server(mut self) -> Self {
        self.setup_server = false;
        self
    }

    /// Builds the [Platform](crate::platform::Platform) with all the enabled components being
    /// installed.
    pub async fn build(self) -> Arc<Platform> {
        let platform = Platform::new();

        if self.setup_logging {
            init_logging();
        }

        log::info!(
            "||. PEERCACHE (v {} - rev {}) running on {} core(s) in {} CPU(s)",
            PEERCACHE_VERSION,
            PEERCACHE_REVISION,
            num_cpus::get(),
            num_cpus::get_physical()
        );

        if self.enable_signals {
            crate::signals::install(platform.clone());
        }

        if self.setup_config {
            crate::config::install(platform.clone()).await;
        }

        if self.setup_server {
            let _ = crate::http::install(&platform);
            let _ = crate::server::Server::install(&platform);
        }

        platform
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::Builder;
    use crate::testing::test_async;

    #[test]
    fn components_are_installed_as_requested() {
        test_async(async {
            let platform = Builder::new().build().await;
            assert_eq!(platform.find_pool().is_none(), true);

            let platform = Builder::new().enable_all().disable_signals().disable_config().build().await;
            assert_eq!(platform.find_pool().is_some(), true);
            assert_eq!(platform.require_pool().self_address(), "http://localhost:8001");
            assert_eq!(platform.require_server().current_address(), None);
        });
    }
}
