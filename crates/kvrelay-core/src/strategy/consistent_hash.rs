//! Consistent Hash Strategy for Backend Selection
//!
//! Keys stay on the same backend as long as the pool does not change, and
//! only a fraction of keys move when it does.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use tracing::trace;

use super::BackendStrategy;

/// Default number of virtual nodes per backend
const DEFAULT_VIRTUAL_NODES: u32 = 150;

/// Consistent hash strategy over a fixed backend list
pub struct ConsistentHashStrategy {
    /// Maps hash values to backend indices
    ring: BTreeMap<u64, usize>,
    backends: usize,
}

impl ConsistentHashStrategy {
    /// Build the ring with 150 virtual nodes per backend
    pub fn new(backends: &[SocketAddr]) -> Self {
        Self::with_virtual_nodes(backends, DEFAULT_VIRTUAL_NODES)
    }

    pub fn with_virtual_nodes(backends: &[SocketAddr], virtual_nodes: u32) -> Self {
        let mut ring = BTreeMap::new();
        for (idx, addr) in backends.iter().enumerate() {
            for vn in 0..virtual_nodes {
                let key = format!("{addr}:{vn}");
                ring.insert(Self::hash_bytes(key.as_bytes()), idx);
            }
        }
        Self {
            ring,
            backends: backends.len(),
        }
    }

    fn hash_bytes(data: &[u8]) -> u64 {
        let hash = blake3::hash(data);
        let bytes = hash.as_bytes();
        u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
            bytes[4], bytes[5], bytes[6], bytes[7],
        ])
    }

    /// First node at or after `hash`, wrapping around
    fn find_in_ring(&self, hash: u64) -> Option<usize> {
        self.ring
            .range(hash..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, &idx)| idx)
    }
}

impl BackendStrategy for ConsistentHashStrategy {
    fn select(&self, routing_key: &str) -> Option<usize> {
        match self.backends {
            0 => None,
            1 => Some(0),
            _ => {
                let hash = Self::hash_bytes(routing_key.as_bytes());
                trace!(routing_key = %routing_key, hash = %hash, "Consistent hash lookup");
                self.find_in_ring(hash)
            }
        }
    }

    fn name(&self) -> &'static str {
        "ConsistentHash"
    }
}
