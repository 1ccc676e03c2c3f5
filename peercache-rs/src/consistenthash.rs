//! Provides consistent hashing to determine which peer owns a key.
//!
//! Each real peer is placed on a ring of 32 bit hash values several times (once per "replica",
//! a.k.a. virtual node). A key is owned by the peer of the first virtual node whose hash is equal
//! to or larger than the hash of the key. If there is none, we wrap around and use the first
//! virtual node on the ring. Using many replicas per peer smooths out the distribution of keys,
//! and adding or removing a peer only moves the keys which are adjacent to its virtual nodes.
//!
//! # Example
//! ```
//! # use peercache::consistenthash::HashRing;
//! let mut ring = HashRing::new(50, None);
//! ring.add(&["http://10.0.0.1:8001", "http://10.0.0.2:8001"]);
//!
//! let owner = ring.get("Tom").unwrap().to_owned();
//! // The result only depends on the state of the ring...
//! assert_eq!(ring.get("Tom"), Some(owner.as_str()));
//! ```
use fnv::FnvHashMap;

/// Maps raw bytes to a position on the ring.
pub type Hash = fn(&[u8]) -> u32;

/// Specifies the number of virtual nodes per peer which is used unless configured otherwise.
pub const DEFAULT_REPLICAS: usize = 50;

/// Represents a ring of virtual nodes which maps keys onto peers.
pub struct HashRing {
    hash: Hash,
    replicas: usize,
    keys: Vec<u32>,
    hash_map: FnvHashMap<u32, String>,
}

impl HashRing {
    /// Creates a new and empty ring.
    ///
    /// Each peer will be represented by **replicas** virtual nodes. If no **hash** function is
    /// given, the CRC32 (IEEE) checksum is used.
    pub fn new(replicas: usize, hash: Option<Hash>) -> Self {
        HashRing {
            hash: hash.unwrap_or(crc32fast::hash),
            replicas,
            keys: Vec::new(),
            hash_map: FnvHashMap::default(),
        }
    }

    /// Adds the given peers to the ring.
    ///
    /// The virtual node **i** of a peer is placed at `hash(i + peer)`. If two virtual nodes
    /// happen to share the same hash, the one added last owns this position.
    pub fn add<S: AsRef<str>>(&mut self, peers: &[S]) {
        for peer in peers {
            let peer = peer.as_ref();
            for replica in 0..self.replicas {
                let hash = (self.hash)(format!("{}{}", replica, peer).as_bytes());
                self.keys.push(hash);
                let _ = self.hash_map.insert(hash, peer.to_owned());
            }
        }

        self.keys.sort_unstable();
    }

    /// Determines the peer which owns the given key.
    ///
    /// Returns **None** if the ring is empty.
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }

        let hash = (self.hash)(key.as_bytes());
        let index = self.keys.partition_point(|position| *position < hash);
        let position = self.keys[index % self.keys.len()];

        self.hash_map.get(&position).map(|peer| peer.as_str())
    }

    /// Determines if no peer has been added yet.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Returns the number of virtual nodes per peer.
    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// Returns all distinct peers which own at least one position on the ring.
    pub fn peers(&self) -> Vec<&str> {
        let mut peers: Vec<&str> = self.hash_map.values().map(|peer| peer.as_str()).collect();
        peers.sort_unstable();
        peers.dedup();

        peers
    }
}

#[cfg(test)]
mod tests {
    use crate::consistenthash::{Hash, HashRing};

    /// Uses the numeric value of the given data as hash so that the positions are predictable.
    fn numeric_hash(data: &[u8]) -> u32 {
        std::str::from_utf8(data).unwrap().parse().unwrap()
    }

    #[test]
    fn keys_are_mapped_to_the_next_virtual_node() {
        let hash: Hash = numeric_hash;
        let mut ring = HashRing::new(3, Some(hash));

        // Yields the virtual nodes 2, 4, 6, 12, 14, 16, 22, 24, 26...
        ring.add(&["6", "4", "2"]);

        assert_eq!(ring.get("2"), Some("2"));
        assert_eq!(ring.get("11"), Some("2"));
        assert_eq!(ring.get("23"), Some("4"));
        // ..and 27 wraps around to 2.
        assert_eq!(ring.get("27"), Some("2"));

        // Adding 8, 18, 28 makes 27 map onto 8...
        ring.add(&["8"]);
        assert_eq!(ring.get("27"), Some("8"));
        assert_eq!(ring.peers(), vec!["2", "4", "6", "8"]);
    }

    #[test]
    fn empty_rings_yield_nothing() {
        let ring = HashRing::new(50, None);
        assert_eq!(ring.is_empty(), true);
        assert_eq!(ring.get("Tom"), None);
    }

    #[test]
    fn lookups_are_deterministic() {
        let peers = ["http://10.0.0.1:8001", "http://10.0.0.2:8001", "http://10.0.0.3:8001"];
        let mut first = HashRing::new(50, None);
        first.add(&peers);
        let mut second = HashRing::new(50, None);
        second.add(&peers);

        for i in 0..1000 {
            let key = format!("key-{}", i);
            let owner = first.get(&key);
            assert!(owner.is_some());
            assert_eq!(first.get(&key), owner);
            assert_eq!(second.get(&key), owner);
        }
    }

    #[test]
    fn keys_are_spread_across_all_peers() {
        let peers = ["http://10.0.0.1:8001", "http://10.0.0.2:8001", "http://10.0.0.3:8001"];
        let mut ring = HashRing::new(50, None);
        ring.add(&peers);

        for peer in peers {
            let owned = (0..3000)
                .filter(|i| ring.get(&format!("key-{}", i)) == Some(peer))
                .count();
            assert!(owned > 150, "{} only owns {} keys", peer, owned);
        }
    }
}
