//! Contains the HTTP server which makes the local groups available to other nodes.
//!
//! Opens a server-socket on the specified port (**server.port** in the config or 8001 as
//! fallback) and binds it to the selected IP (**server.host** in the config or 0.0.0.0 as
//! fallback). All incoming requests are handed to the [HttpPool] of the platform.
//!
//! Note that in order to achieve zero downtime, the server will periodically try to bind the
//! socket to the selected port. Therefore a "new" instance can be started while the "old" one
//! bleeds out and the port will be "handed through" with minimal downtime. Also, this will listen
//! to change events of the config and will relocate to another port or host if changed.
//!
//! # Example
//!
//! ```no_run
//! use peercache::builder::Builder;
//!
//! #[tokio::main]
//! async fn main() {
//!     let platform = Builder::new().enable_all().build().await;
//!
//!     // Specify a minimal config so that we run on a different port than a
//!     // production instance.
//!     platform.config().load_from_string("
//!         server:
//!             port: 1503
//!     ", None).unwrap();
//!
//!     // Run the platform...
//!     platform.require_server().event_loop().await;
//! }
//! ```
use std::convert::Infallible;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request};
use tokio::net::TcpListener;

use crate::config::Handle;
use crate::http::HttpPool;
use crate::platform::Platform;
use crate::spawn;

/// Contains the port used if no **server.port** is configured.
pub const DEFAULT_PORT: u16 = 8001;

/// Specifies the interval in which a running server checks if the platform is still running.
pub(crate) const SHUTDOWN_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Specifies the interval in which we retry to bind the server socket.
const BIND_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Determines the port to listen on based on the given config.
pub(crate) fn configured_port(handle: &Handle) -> u16 {
    handle
        .query("server.port")
        .as_i64()
        .and_then(|port| u16::try_from(port).ok())
        .filter(|port| *port > 0)
        .unwrap_or(DEFAULT_PORT)
}

/// Serves the given pool on the given listener until **shutdown** completes.
///
/// Note that the listener has to be in non-blocking mode. Once **shutdown** completes, no new
/// connections are accepted and the future completes once all pending requests are handled.
pub async fn serve(
    listener: std::net::TcpListener,
    pool: Arc<HttpPool>,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let make_service = make_service_fn(move |connection: &AddrStream| {
        log::debug!("Opened connection from {}...", connection.remote_addr());
        let pool = pool.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |request: Request<Body>| {
                let pool = pool.clone();
                async move { Ok::<_, Infallible>(pool.serve_http(request).await) }
            }))
        }
    });

    hyper::Server::from_tcp(listener)?
        .serve(make_service)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Represents the server which binds the [HttpPool] to a socket.
pub struct Server {
    running: AtomicBool,
    current_address: Mutex<Option<String>>,
    platform: Arc<Platform>,
}

impl Server {
    /// Creates and installs a **Server** into the given **Platform**.
    ///
    /// Note that this is called by the [Builder](crate::builder::Builder) unless disabled.
    ///
    /// Also note, that this will not technically start the server. This has to be done manually
    /// via [event_loop](Server::event_loop) as it is most probably done in the main thread.
    pub fn install(platform: &Arc<Platform>) -> Arc<Self> {
        let server = Arc::new(Server {
            running: AtomicBool::new(false),
            current_address: Mutex::new(None),
            platform: platform.clone(),
        });

        platform.register_server(server.clone());

        server
    }

    fn lock_address(&self) -> MutexGuard<Option<String>> {
        self.current_address
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the address the server socket is currently bound to.
    pub fn current_address(&self) -> Option<String> {
        self.lock_address().clone()
    }

    /// Determines if the server socket should keep listening for incoming connections.
    ///
    /// In contrast to **Platform::is_running** this is not used to control the shutdown of the
    /// server. Rather we toggle this flag to false if a config and therefore address change was
    /// detected. This way the server stops and a new server socket for the appropriate address
    /// will be set up by the **event_loop**.
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Determines the server address based on the current configuration.
    fn address(&self) -> String {
        let handle = self.platform.config().current();
        format!(
            "{}:{}",
            handle.query("server.host").as_str().unwrap_or("0.0.0.0"),
            configured_port(&handle)
        )
    }

    /// Starts the event loop in a separate task.
    ///
    /// This is most probably used by test scenarios where the tests itself run in the main thread.
    pub fn fork(server: &Arc<Server>) {
        let cloned_server = server.clone();
        spawn!(async move {
            cloned_server.event_loop().await;
        });
    }

    /// Starts the event loop in a separate task and waits until the server socket is bound.
    ///
    /// Just like **fork** this is intended to be used in test environments.
    pub async fn fork_and_await(server: &Arc<Server>) {
        Server::fork(server);

        while server.current_address().is_none() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Tries to open a server socket on the specified address to serve incoming requests.
    ///
    /// The task of this loop is to bind the server socket to the specified address. Once this was
    /// successful, the [HttpPool] of the platform is served. Once serving stops, either the
    /// platform is no longer running and we should exit, or the config has changed and we should
    /// try to bind the server to the new address.
    pub async fn event_loop(&self) {
        let mut address = String::new();
        let mut last_bind_error_reported = Instant::now();

        while self.platform.is_running() {
            // If the server is started for the first time or if it has been restarted due to a
            // config change, we need to reload the address...
            if !self.is_running() {
                address = self.address();
                self.running.store(true, Ordering::Release);
            }

            match TcpListener::bind(&address).await {
                Ok(listener) => {
                    log::info!("Opened server socket on {}...", &address);
                    *self.lock_address() = Some(address.clone());
                    self.server_loop(listener).await;
                    *self.lock_address() = None;
                    log::info!("Closing server socket on {}.", &address);
                }
                Err(error) => {
                    // We only log this every once in a while (every 5s), as we retry every 500ms.
                    if last_bind_error_reported.elapsed().as_secs() > 5 {
                        log::error!(
                            "Cannot open server address: {} ({}). Retrying every 500ms...",
                            &address,
                            error
                        );
                        last_bind_error_reported = Instant::now();
                    }
                    tokio::time::sleep(BIND_RETRY_INTERVAL).await;
                }
            }
        }
    }

    async fn server_loop(&self, listener: TcpListener) {
        let listener = match listener.into_std() {
            Ok(listener) => listener,
            Err(error) => {
                log::error!("Failed to set up the server socket: {}", error);
                return;
            }
        };

        let pool = self.platform.require_pool();
        if let Err(error) = serve(listener, pool, self.await_shutdown()).await {
            log::error!("The HTTP server failed: {}", error);
            tokio::time::sleep(BIND_RETRY_INTERVAL).await;
        }
    }

    /// Completes once the platform is terminated or the server address has changed.
    async fn await_shutdown(&self) {
        let mut config_changed = self.platform.config().notifier();

        while self.platform.is_running() && self.is_running() {
            tokio::select! {
                _ = tokio::time::sleep(SHUTDOWN_CHECK_INTERVAL) => (),
                _ = config_changed.recv() => self.check_address(),
            }
        }
    }

    fn check_address(&self) {
        let new_address = self.address();
        let changed = self
            .lock_address()
            .as_ref()
            .map(|current_address| current_address != &new_address)
            .unwrap_or(false);

        if changed {
            log::info!("Server address has changed. Restarting server socket...");

            // Force the event_loop to re-evaluate the expected server address...
            self.running.store(false, Ordering::Release);
        }
    }
}
