//! Local peer store: info_hash -> announced endpoints.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddrV4;

use super::node_id::NodeId;

/// Mapping from info-hash to the set of endpoints announced for it.
///
/// Grown by `announce_peer`; never shrunk by the core (a production
/// deployment may expire entries, but entries here are durable for the
/// process lifetime per spec).
#[derive(Debug, Default)]
pub struct LocalPeerStore {
    entries: HashMap<NodeId, HashSet<SocketAddrV4>>,
}

impl LocalPeerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `addr` for `info_hash`. Idempotent on duplicate `(ip, port)`.
    pub fn announce(&mut self, info_hash: NodeId, addr: SocketAddrV4) {
        self.entries.entry(info_hash).or_default().insert(addr);
    }

    pub fn get(&self, info_hash: &NodeId) -> Option<Vec<SocketAddrV4>> {
        self.entries.get(info_hash).map(|set| set.iter().copied().collect())
    }

    pub fn contains(&self, info_hash: &NodeId) -> bool {
        self.entries.contains_key(info_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn announce_is_idempotent() {
        let mut store = LocalPeerStore::new();
        let h = NodeId::new([1; 20]);
        let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 6881);
        store.announce(h, addr);
        store.announce(h, addr);
        assert_eq!(store.get(&h).unwrap().len(), 1);
    }
}
