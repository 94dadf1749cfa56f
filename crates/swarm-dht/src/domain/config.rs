//! Tunable Kademlia parameters.

use std::time::Duration;

/// Configuration constants for the Kademlia DHT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KademliaConfig {
    /// Bucket size (default: 8).
    pub k: usize,
    /// Per-wave parallelism for iterative lookups (default: 3).
    pub alpha: usize,
    /// Per-RPC deadline (default: 2s).
    pub rpc_timeout: Duration,
}

impl Default for KademliaConfig {
    fn default() -> Self {
        Self {
            k: 8,
            alpha: 3,
            rpc_timeout: Duration::from_secs(2),
        }
    }
}

impl KademliaConfig {
    /// Smaller, faster-timing-out config for tests.
    pub fn for_testing() -> Self {
        Self {
            k: 8,
            alpha: 3,
            rpc_timeout: Duration::from_millis(200),
        }
    }
}
