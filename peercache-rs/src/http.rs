//! Provides the HTTP transport which is used to fetch values from other nodes.
//!
//! Each node serves its groups below a common prefix (**/_peercache/** by default). A value is
//! requested via `GET {prefix}{group}/{key}` where both, the group name and the key are
//! percent-encoded. The response is either:
//! * **200** along with the raw bytes of the value as body
//! * **400** with "bad request" if the path doesn't consist of a group name and a key
//! * **404** with "no such group: {group}" if the group is unknown
//! * **500** with the error message if the value couldn't be loaded
//!
//! The [HttpPool] is both, the request handler for incoming requests and the [PeerPicker]
//! which knows all peers and creates an [HttpGetter] per peer to fetch values from it.
//!
//! The peers are configured in the **node** section of the config:
//! ```yaml
//! node:
//!     self: http://10.0.0.1:8001
//!     base_path: /_peercache/
//!     replicas: 50
//!     peers:
//!         - http://10.0.0.1:8001
//!         - http://10.0.0.2:8001
//! ```
//! Once the config changes, the set of peers is replaced as a whole.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Client, Request, Response, StatusCode, Uri};
use tokio::sync::broadcast::error::RecvError;
use yaml_rust::Yaml;

use crate::config::Handle;
use crate::consistenthash::{Hash, HashRing, DEFAULT_REPLICAS};
use crate::error::{CacheError, Result};
use crate::group::Groups;
use crate::peers::{PeerGetter, PeerPicker};
use crate::platform::Platform;
use crate::server::SHUTDOWN_CHECK_INTERVAL;
use crate::spawn;

/// Contains the path prefix below which the groups are served unless configured otherwise.
pub const DEFAULT_BASE_PATH: &str = "/_peercache/";

struct PoolState {
    peers: Vec<String>,
    ring: HashRing,
    getters: HashMap<String, Arc<HttpGetter>>,
}

/// Serves the local groups via HTTP and picks the peers which own a given key.
pub struct HttpPool {
    self_address: String,
    base_path: String,
    replicas: usize,
    hash: Option<Hash>,
    groups: Arc<Groups>,
    client: Client<HttpConnector>,
    state: Mutex<PoolState>,
}

impl HttpPool {
    /// Creates a new pool for the node reachable via **self_address** (e.g.
    /// "http://10.0.0.1:8001") which serves the given groups.
    ///
    /// Note that the pool doesn't know any peers until [set_peers](HttpPool::set_peers) is
    /// invoked.
    pub fn new(self_address: &str, groups: Arc<Groups>) -> Self {
        HttpPool {
            self_address: self_address.to_owned(),
            base_path: DEFAULT_BASE_PATH.to_owned(),
            replicas: DEFAULT_REPLICAS,
            hash: None,
            groups,
            client: Client::new(),
            state: Mutex::new(PoolState {
                peers: Vec::new(),
                ring: HashRing::new(DEFAULT_REPLICAS, None),
                getters: HashMap::new(),
            }),
        }
    }

    /// Specifies the path prefix below which the groups are served.
    pub fn with_base_path(mut self, base_path: &str) -> Self {
        self.base_path = base_path.to_owned();
        self
    }

    /// Specifies the number of virtual nodes per peer on the hash ring.
    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }

    /// Specifies the hash function used by the hash ring.
    pub fn with_hash(mut self, hash: Hash) -> Self {
        self.hash = Some(hash);
        self
    }

    /// Returns the address of this node.
    pub fn self_address(&self) -> &str {
        &self.self_address
    }

    /// Returns the path prefix below which the groups are served.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    fn lock(&self) -> MutexGuard<PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the set of known peers.
    ///
    /// The given list should also contain this node itself, so that the keys it owns are
    /// distributed correctly. The hash ring and all getters are rebuilt from scratch.
    pub fn set_peers<S: AsRef<str>>(&self, peers: &[S]) {
        let mut ring = HashRing::new(self.replicas, self.hash);
        ring.add(peers);

        let getters = peers
            .iter()
            .map(|peer| {
                let peer = peer.as_ref();
                let getter = HttpGetter {
                    base_url: format!("{}{}", peer, self.base_path),
                    client: self.client.clone(),
                };
                (peer.to_owned(), Arc::new(getter))
            })
            .collect();

        let peers: Vec<String> = peers.iter().map(|peer| peer.as_ref().to_owned()).collect();
        log::info!("Setting peers of {}: {}", self.self_address, peers.join(", "));

        let mut state = self.lock();
        state.peers = peers;
        state.ring = ring;
        state.getters = getters;
    }

    /// Returns the currently known peers.
    pub fn peers(&self) -> Vec<String> {
        self.lock().peers.clone()
    }

    /// Handles an incoming request for a value of a local group.
    pub async fn serve_http(&self, request: Request<Body>) -> Response<Body> {
        let path = request.uri().path();
        log::debug!("[Server {}] {} {}", self.self_address, request.method(), path);

        let remainder = match path.strip_prefix(self.base_path.as_str()) {
            Some(remainder) => remainder,
            None => return respond(StatusCode::NOT_FOUND, format!("unexpected path: {}", path)),
        };

        let (group_name, key) = match parse_group_and_key(remainder) {
            Some(group_and_key) => group_and_key,
            None => return respond(StatusCode::BAD_REQUEST, "bad request"),
        };

        let group = match self.groups.get(&group_name) {
            Some(group) => group,
            None => {
                return respond(
                    StatusCode::NOT_FOUND,
                    format!("no such group: {}", group_name),
                )
            }
        };

        match group.get(&key).await {
            Ok(value) => {
                let mut response = Response::new(Body::from(value.byte_slice()));
                let _ = response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("application/octet-stream"),
                );
                response
            }
            Err(error) => respond(StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
        }
    }
}

/// Splits the path below the prefix into a group name and a key on the first "/".
fn parse_group_and_key(remainder: &str) -> Option<(String, String)> {
    let (group_name, key) = remainder.split_once('/')?;
    let group_name = urlencoding::decode(group_name).ok()?;
    let key = urlencoding::decode(key).ok()?;

    Some((group_name.into_owned(), key.into_owned()))
}

fn respond(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;

    response
}

impl PeerPicker for HttpPool {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
        let state = self.lock();
        let peer = state.ring.get(key)?;
        if peer == self.self_address {
            return None;
        }

        log::debug!("Pick peer {} for {}", peer, key);
        let getter: Arc<dyn PeerGetter> = state.getters.get(peer)?.clone();
        Some(getter)
    }
}

/// Fetches values from a single peer via HTTP.
pub struct HttpGetter {
    base_url: String,
    client: Client<HttpConnector>,
}

impl HttpGetter {
    /// Creates a getter which fetches from the given base URL (address of the peer along with
    /// its path prefix).
    pub fn new(base_url: &str) -> Self {
        HttpGetter {
            base_url: base_url.to_owned(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl PeerGetter for HttpGetter {
    async fn get(&self, group: &str, key: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}{}/{}",
            self.base_url,
            urlencoding::encode(group),
            urlencoding::encode(key)
        );
        let uri = url
            .parse::<Uri>()
            .map_err(|error| CacheError::transport(format!("invalid url {}: {}", url, error)))?;

        let response = self
            .client
            .get(uri)
            .await
            .map_err(|error| CacheError::transport(format!("GET {} failed: {}", url, error)))?;
        if response.status() != StatusCode::OK {
            return Err(CacheError::transport(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }

        let body = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|error| {
                CacheError::transport(format!("reading the body of {} failed: {}", url, error))
            })?;

        Ok(body.to_vec())
    }
}

/// Contains the settings of the **node** section of the config.
struct NodeSettings {
    self_address: String,
    base_path: String,
    replicas: usize,
    peers: Vec<String>,
}

impl NodeSettings {
    fn from_config(handle: &Handle) -> Self {
        NodeSettings {
            self_address: handle
                .query("node.self")
                .as_str()
                .map(|address| address.to_owned())
                .unwrap_or_else(|| {
                    format!("http://localhost:{}", crate::server::configured_port(handle))
                }),
            base_path: handle
                .query("node.base_path")
                .as_str()
                .unwrap_or(DEFAULT_BASE_PATH)
                .to_owned(),
            replicas: handle
                .query("node.replicas")
                .as_i64()
                .filter(|replicas| *replicas > 0)
                .and_then(|replicas| usize::try_from(replicas).ok())
                .unwrap_or(DEFAULT_REPLICAS),
            peers: NodeSettings::peers(handle),
        }
    }

    fn peers(handle: &Handle) -> Vec<String> {
        match handle.query("node.peers") {
            Yaml::Array(peers) => peers
                .iter()
                .filter_map(|peer| peer.as_str())
                .map(|peer| peer.to_owned())
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Creates an [HttpPool] based on the current config and installs it into the given platform.
///
/// Once the config changes, the peers of the pool are updated accordingly. Note that this is
/// invoked by the [Builder](crate::builder::Builder) unless the server is disabled.
pub fn install(platform: &Arc<Platform>) -> Arc<HttpPool> {
    let settings = NodeSettings::from_config(&platform.config().current());
    let pool = Arc::new(
        HttpPool::new(&settings.self_address, platform.groups().clone())
            .with_base_path(&settings.base_path)
            .with_replicas(settings.replicas),
    );
    pool.set_peers(&settings.peers);
    platform.register_pool(pool.clone());

    let mut config_changed = platform.config().notifier();
    let cloned_platform = platform.clone();
    let cloned_pool = pool.clone();
    spawn!(async move {
        while cloned_platform.is_running() {
            tokio::select! {
                _ = tokio::time::sleep(SHUTDOWN_CHECK_INTERVAL) => (),
                change = config_changed.recv() => match change {
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        let peers = NodeSettings::peers(&cloned_platform.config().current());
                        if peers != cloned_pool.peers() {
                            cloned_pool.set_peers(&peers);
                        }
                    }
                    Err(RecvError::Closed) => return,
                },
            }
        }
    });

    pool
}
