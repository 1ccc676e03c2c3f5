//! Describes the capabilities a [Group](crate::group::Group) uses to talk to its peers.
//!
//! A group doesn't know anything about the network. It only asks a [PeerPicker] which peer (if
//! any) owns a key and then uses the returned [PeerGetter] to fetch the value from there. The
//! HTTP based implementation of both is provided by [HttpPool](crate::http::HttpPool), but
//! tests (or alternative transports) can provide their own.
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// Fetches values from a remote peer.
#[async_trait]
pub trait PeerGetter: Send + Sync {
    /// Fetches the value of the given key within the given group from the peer.
    async fn get(&self, group: &str, key: &str) -> Result<Vec<u8>>;
}

/// Determines the peer which owns a given key.
pub trait PeerPicker: Send + Sync {
    /// Returns the getter for the owning peer of **key**.
    ///
    /// Returns **None** if there are no peers or if the key is owned by this node itself, so that
    /// the caller handles it locally.
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>>;
}
