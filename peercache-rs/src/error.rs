//! Contains the errors which are reported along the data path of a cache lookup.
//!
//! All of these are ordinary results which are handed back to the caller. Note that a
//! [CacheError] has to be **Clone** as a single failed load is shared by all callers which were
//! waiting for the same key (see [SingleFlight](crate::singleflight::SingleFlight)).
//!
//! Configuration mistakes (like registering the peers of a group twice) are not represented
//! here, as these are programming errors which immediately panic.
use std::sync::Arc;

use thiserror::Error;

/// Result type used by all lookups of the cache.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Enumerates the errors which can occur when resolving a key.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// An empty key was given. This is rejected before the cache, the loader or any peer
    /// is consulted.
    #[error("key is required")]
    KeyRequired,

    /// The loader supplied by the application failed. The message is reported verbatim.
    #[error("{0}")]
    Loader(Arc<anyhow::Error>),

    /// Fetching the value from the owning peer failed.
    #[error("peer transport failed: {0}")]
    Transport(String),

    /// The deadline given via [Group::get_with_timeout](crate::group::Group::get_with_timeout)
    /// elapsed before a value was available.
    #[error("deadline exceeded")]
    Timeout,
}

impl CacheError {
    /// Wraps an error reported by a loader.
    pub fn loader(error: anyhow::Error) -> Self {
        CacheError::Loader(Arc::new(error))
    }

    /// Creates a transport error with the given description.
    pub fn transport(message: impl Into<String>) -> Self {
        CacheError::Transport(message.into())
    }
}
