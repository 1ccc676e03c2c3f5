//! Contains the system configuration.
//!
//! Provides access to the system configuration which is loaded from the **config/settings.yml**
//! file. We observe this file for changes and reload it once a change is detected. Therefore each
//! user of the config should attach itself to the [Config::notifier](Config::notifier) and
//! re-process the config once a change message is received. This way a node can e.g. learn about
//! new peers without being restarted (and thus without losing its cache contents).
//!
//! Note that a [Handle] obtained via **Config::current()** should not be stored, as it will not
//! be updated once a new config has been loaded.
//!
//! # Examples
//!
//! Reading the config:
//! ```
//! # use peercache::config::Config;
//! let config = Config::new("settings.yml");
//! config.load_from_string("
//! node:
//!     replicas: 64
//!     peers:
//!         - http://10.0.0.1:8001
//!         - http://10.0.0.2:8001
//! ", None).unwrap();
//!
//! assert_eq!(config.current().query("node.replicas").as_i64().unwrap(), 64);
//! assert_eq!(config.current().query("node.peers")[1].as_str().unwrap(), "http://10.0.0.2:8001");
//! assert_eq!(config.current().query("node.unknown.value").is_badvalue(), true);
//! ```
//!
//! Attaching a change listener:
//! ```no_run
//! # use peercache::builder::Builder;
//! # #[tokio::main]
//! # async fn main() {
//! # let platform = Builder::new().enable_config().build().await;
//! let config = platform.config().clone();
//! tokio::spawn(async move {
//!     loop {
//!         match config.notifier().recv().await {
//!             Ok(_) => log::info!("Config update received..."),
//!             _ => return,
//!         }
//!     }
//! });
//! # }
//! ```
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Context;
use arc_swap::ArcSwap;
use yaml_rust::{Yaml, YamlLoader};

use crate::platform::Platform;

/// Provides access to the system configuration.
///
/// An instance is always present in the [Platform] and will be filled by [install] if the
/// config is enabled in the [Builder](crate::builder::Builder).
pub struct Config {
    filename: String,
    tx: tokio::sync::broadcast::Sender<()>,
    config: ArcSwap<(Yaml, Option<SystemTime>)>,
}

/// Represents the change listener.
///
/// Internally this is simply the receiver of a broadcast. The actual message being broadcast
/// can and should be ignored. All that matters is, once a message has been received, the config
/// was changed and needs to be re-processed.
pub type ChangeNotifier = tokio::sync::broadcast::Receiver<()>;

/// Represents a handle to the currently loaded configuration.
pub struct Handle {
    config: Arc<(Yaml, Option<SystemTime>)>,
}

impl Config {
    /// Creates a new and empty config which is backed by the given file.
    ///
    /// Note that this will neither load the file nor watch it for changes. This is done by
    /// [install].
    pub fn new(file: &str) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(1);
        Config {
            filename: file.to_owned(),
            config: ArcSwap::new(Arc::new((Yaml::Null, None))),
            tx,
        }
    }

    /// Obtains a change notifier which receives a message once the config changed.
    pub fn notifier(&self) -> ChangeNotifier {
        self.tx.subscribe()
    }

    /// Obtains a handle to the currently loaded configuration.
    pub fn current(&self) -> Handle {
        Handle {
            config: self.config.load_full(),
        }
    }

    /// Determines the last modified date of the config file on disk.
    ///
    /// Within docker, the file might be presented as volume. Therefore we check that it is a
    /// file, as an unmounted volume shows up as directory.
    #[cfg(not(test))]
    async fn last_modified(&self) -> Option<SystemTime> {
        tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .filter(|meta| meta.is_file())
            .and_then(|meta| meta.modified().ok())
    }

    /// Reads the underlying file.
    ///
    /// A missing file is not considered an error, in this case the defaults of all settings
    /// are used.
    pub async fn load(&self) -> anyhow::Result<()> {
        let metadata = match tokio::fs::metadata(&self.filename).await {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => {
                log::info!(
                    "Config file {} doesn't exist - using default settings.",
                    &self.filename
                );
                return Ok(());
            }
        };

        log::info!("Loading config file {}...", &self.filename);
        let data = tokio::fs::read_to_string(&self.filename)
            .await
            .with_context(|| format!("Cannot load config file {}", &self.filename))?;

        self.load_from_string(data.as_str(), metadata.modified().ok())
    }

    /// Validates and writes the given config into the underlying file.
    ///
    /// Note that the new config isn't applied directly. It is picked up by the change monitor
    /// started via [install] or by invoking [load](Config::load).
    ///
    /// # Example
    ///
    /// ```
    /// # use peercache::config::Config;
    /// # #[tokio::main]
    /// # async fn main() {
    /// let config = Config::new("peercache_test_config.yml");
    ///
    /// // Write a config file and load it back...
    /// assert_eq!(config.store("server:\n    port: 12345\n").await.is_ok(), true);
    /// assert_eq!(config.load().await.is_ok(), true);
    /// assert_eq!(config.current().query("server.port").as_i64().unwrap(), 12345);
    ///
    /// // Writing an invalid config file is prevented...
    /// assert_eq!(config.store("server: \"test").await.is_err(), true);
    ///
    /// // Therefore the previous config is still present...
    /// assert_eq!(config.load().await.is_ok(), true);
    /// assert_eq!(config.current().query("server.port").as_i64().unwrap(), 12345);
    /// # let _ = std::fs::remove_file("peercache_test_config.yml");
    /// # }
    /// ```
    pub async fn store(&self, config: &str) -> anyhow::Result<()> {
        if let Err(error) = YamlLoader::load_from_str(config) {
            return Err(anyhow::anyhow!("Cannot parse config data: {}", error));
        }

        tokio::fs::write(&self.filename, config)
            .await
            .with_context(|| format!("Failed to write to config file {}", &self.filename))?;
        log::info!("Config file {} has been updated.", &self.filename);

        Ok(())
    }

    /// Loads a configuration from the given string instead of a file.
    ///
    /// If the data cannot be parsed, an error is returned and the previous config remains
    /// active. Otherwise all listeners are notified.
    pub fn load_from_string(
        &self,
        data: &str,
        last_modified: Option<SystemTime>,
    ) -> anyhow::Result<()> {
        let mut docs = YamlLoader::load_from_str(data).map_err(|error| {
            anyhow::anyhow!("Cannot parse config file {}: {}", &self.filename, error)
        })?;

        let doc = if docs.is_empty() {
            Yaml::Null
        } else {
            docs.swap_remove(0)
        };

        self.config.store(Arc::new((doc, last_modified)));

        // Notify all listeners - we ignore if there are none...
        let _ = self.tx.send(());

        Ok(())
    }
}

impl Handle {
    /// Provides access to the root of the currently loaded configuration.
    pub fn config(&self) -> &Yaml {
        &self.config.0
    }

    /// Resolves a dotted path like "node.peers" within the current configuration.
    ///
    /// Returns **Yaml::BadValue** if any part of the path doesn't exist.
    pub fn query(&self, query: impl AsRef<str>) -> &Yaml {
        query
            .as_ref()
            .split('.')
            .fold(&self.config.0, |node, key| &node[key])
    }
}

/// Loads the config of the given platform from **config/settings.yml** and starts watching it.
///
/// The change monitor only checks the "last modified" date of the file every two seconds and
/// will not perform a structural comparison. Therefore it is the duty of each config user to
/// gracefully handle partial config changes.
///
/// Note that this is called by the [Builder](crate::builder::Builder) unless the config is
/// disabled.
pub async fn install(platform: Arc<Platform>) {
    let path = Path::new("config");
    if let Err(error) = tokio::fs::create_dir_all(path).await {
        log::warn!(
            "Failed to create config base directory {}: {}",
            path.to_string_lossy(),
            error
        )
    }

    let config = platform.config().clone();
    if let Err(error) = config.load().await {
        log::error!("{:#}", error);
    }

    run_config_change_monitor(platform, config);
}

#[cfg(test)]
fn run_config_change_monitor(_platform: Arc<Platform>, _config: Arc<Config>) {
    // No automatic updates during testing...
}

#[cfg(not(test))]
fn run_config_change_monitor(platform: Arc<Platform>, config: Arc<Config>) {
    crate::spawn!(async move {
        while platform.is_running() {
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            let last_modified = config.last_modified().await;
            let last_loaded = config.config.load().1;

            if last_modified.is_some() && (last_loaded.is_none() || last_modified > last_loaded) {
                match config.load().await {
                    Ok(_) => log::info!("System configuration was re-loaded."),
                    Err(error) => log::error!("Failed to re-load system config: {:#}", error),
                }
            }
        }
    });
}
