//! Provides the immutable value type stored in the cache.
//!
//! A [ByteView] is created by copying (or taking ownership of) the bytes supplied by a loader or a
//! peer. Afterwards there is no way to reach the internal buffer: raw bytes are only ever handed out
//! as a fresh copy. Therefore, a caller can never corrupt the contents of the cache by modifying
//! a value it obtained.
use std::fmt::{Debug, Display, Formatter};

use bytes::Bytes;

use crate::lru::ByteSize;

/// Represents an immutable view of bytes.
///
/// Cloning a view is cheap, as the underlying buffer is shared. This is safe, as the buffer is
/// never mutated once the view has been created.
///
/// # Examples
/// ```
/// # use peercache::byteview::ByteView;
/// let mut data = b"Hello".to_vec();
/// let view = ByteView::new(&data);
///
/// // Changing the source doesn't affect the view...
/// data[0] = b'J';
/// assert_eq!(view.to_string(), "Hello");
///
/// // ...and neither does changing a copy obtained from the view.
/// let mut copy = view.byte_slice();
/// copy[0] = b'J';
/// assert_eq!(view.to_string(), "Hello");
/// assert_eq!(view.len(), 5);
/// ```
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ByteView {
    data: Bytes,
}

impl ByteView {
    /// Creates a new view by copying the given bytes.
    pub fn new(data: &[u8]) -> Self {
        ByteView {
            data: Bytes::copy_from_slice(data),
        }
    }

    /// Returns the number of bytes in this view.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Determines if the view is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns a copy of the underlying bytes.
    pub fn byte_slice(&self) -> Vec<u8> {
        self.data.to_vec()
    }
}

impl From<Vec<u8>> for ByteView {
    /// Takes ownership of the given buffer. As the caller gives up the vector, no copy is
    /// required to guarantee immutability.
    fn from(data: Vec<u8>) -> Self {
        ByteView {
            data: Bytes::from(data),
        }
    }
}

impl From<&str> for ByteView {
    fn from(data: &str) -> Self {
        ByteView::new(data.as_bytes())
    }
}

impl ByteSize for ByteView {
    fn allocated_size(&self) -> usize {
        self.len()
    }
}

impl Display for ByteView {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.data))
    }
}

impl Debug for ByteView {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ByteView({:?})", String::from_utf8_lossy(&self.data))
    }
}
