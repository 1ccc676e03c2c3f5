//! Provides a size constrained LRU Cache.
//!
//! An LRU cache drops the least recently used entry if it is about to grow beyond its memory
//! limit. The memory of an entry is accounted as the length of its key plus the size of its
//! value as reported by the [ByteSize](ByteSize) trait.
//!
//! [LRUCache](LRUCache) itself isn't thread safe. The [cache](cache) module wraps it into a
//! lazily initialized, lockable [Cache](cache::Cache) which is what each
//! [Group](crate::group::Group) uses to store its values.
pub mod cache;
mod lru_cache;

pub use lru_cache::ByteSize;
pub use lru_cache::EvictionCallback;
pub use lru_cache::LRUCache;
