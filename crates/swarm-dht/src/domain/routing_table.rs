//! The 160-bucket routing table.

use super::contact::Contact;
use super::errors::RoutingError;
use super::kbucket::{Admission, KBucket};
use super::node_id::NodeId;

/// Number of buckets: one per possible bit position of a 160-bit distance.
pub const NUM_BUCKETS: usize = 160;

/// Outcome of [`RoutingTable::begin_insert`].
///
/// Split into a synchronous half (`begin_insert`) and — only when the
/// target bucket is full — a second synchronous half (`resolve_insert`)
/// that the caller invokes after awaiting the liveness probe. Splitting it
/// this way means the table is never held locked across the probe's I/O,
/// per the concurrency discipline of keeping shared-state critical
/// sections free of suspension points.
#[derive(Debug)]
pub enum InsertStep {
    Refreshed,
    Inserted,
    /// The bucket at `bucket_index` is full; probe `oldest` and report the
    /// result back through [`RoutingTable::resolve_insert`].
    NeedsProbe { bucket_index: usize, oldest: Contact },
}

/// Exactly [`NUM_BUCKETS`] k-buckets indexed by the MSB position of the XOR
/// distance from the local node id.
pub struct RoutingTable {
    local_id: NodeId,
    k: usize,
    buckets: Vec<KBucket>,
}

impl RoutingTable {
    pub fn new(local_id: NodeId, k: usize) -> Self {
        Self {
            local_id,
            k,
            buckets: (0..NUM_BUCKETS).map(|_| KBucket::new(k)).collect(),
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    fn bucket_index_for(&self, node_id: &NodeId) -> Result<usize, RoutingError> {
        self.local_id
            .distance(node_id)
            .bucket_index()
            .ok_or(RoutingError::SelfInsertion)
    }

    /// Begin inserting `contact`. Self-insertion is rejected rather than
    /// (as the unguarded original did) silently computing a nonsensical
    /// bucket index.
    pub fn begin_insert(&mut self, contact: Contact) -> Result<InsertStep, RoutingError> {
        let index = self.bucket_index_for(&contact.node_id)?;
        let bucket = &mut self.buckets[index];
        Ok(match bucket.add(contact) {
            Admission::Refreshed => InsertStep::Refreshed,
            Admission::Inserted => InsertStep::Inserted,
            Admission::Full { oldest } => InsertStep::NeedsProbe {
                bucket_index: index,
                oldest,
            },
        })
    }

    /// Complete a [`InsertStep::NeedsProbe`] once the oldest contact has
    /// been probed for liveness.
    pub fn resolve_insert(&mut self, bucket_index: usize, candidate: Contact, oldest_alive: bool) -> bool {
        self.buckets[bucket_index].resolve_eviction(candidate, oldest_alive)
    }

    /// Touch (refresh) an existing contact without the full insert dance;
    /// used for plain keep-alive updates.
    pub fn touch(&mut self, node_id: &NodeId) -> bool {
        match self.bucket_index_for(node_id) {
            Ok(index) => self.buckets[index].touch(node_id),
            Err(_) => false,
        }
    }

    pub fn remove(&mut self, node_id: &NodeId) -> Option<Contact> {
        let index = self.bucket_index_for(node_id).ok()?;
        self.buckets[index].remove(node_id)
    }

    /// The `n` contacts closest to `target`, ascending by XOR distance,
    /// ties broken by insertion order (stable sort).
    pub fn closest(&self, target: &NodeId, n: usize) -> Vec<Contact> {
        let mut all: Vec<Contact> = self
            .buckets
            .iter()
            .flat_map(|b| b.contacts().iter().cloned())
            .collect();
        all.sort_by_key(|c| c.node_id.distance(target));
        all.truncate(n);
        all
    }

    /// Total number of contacts across all buckets.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(KBucket::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        match self.bucket_index_for(node_id) {
            Ok(index) => self.buckets[index].contacts().iter().any(|c| &c.node_id == node_id),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn contact(id: u8) -> Contact {
        Contact::new(NodeId::new([id; 20]), SocketAddrV4::new(Ipv4Addr::LOCALHOST, id as u16))
    }

    fn insert(table: &mut RoutingTable, id: u8) {
        match table.begin_insert(contact(id)).unwrap() {
            InsertStep::NeedsProbe { bucket_index, oldest } => {
                table.resolve_insert(bucket_index, contact(id), false);
                let _ = oldest;
            }
            _ => {}
        }
    }

    #[test]
    fn self_insertion_is_rejected() {
        let local = NodeId::new([9; 20]);
        let mut table = RoutingTable::new(local, 8);
        let err = table.begin_insert(Contact::new(local, SocketAddrV4::new(Ipv4Addr::LOCALHOST, 1)));
        assert!(matches!(err, Err(RoutingError::SelfInsertion)));
    }

    /// S2 — Closest nodes ordering.
    #[test]
    fn closest_orders_by_xor_distance() {
        let target = NodeId::new([0u8; 20]);
        let mut table = RoutingTable::new(NodeId::new([0xFF; 20]), 8);

        let mk = |v: u8| {
            let mut b = [0u8; 20];
            b[19] = v;
            b
        };
        for v in [0b0001u8, 0b0110, 0b1000, 0b1111] {
            let c = Contact::new(NodeId::new(mk(v)), SocketAddrV4::new(Ipv4Addr::LOCALHOST, v as u16));
            match table.begin_insert(c.clone()).unwrap() {
                InsertStep::NeedsProbe { bucket_index, .. } => {
                    table.resolve_insert(bucket_index, c, false);
                }
                _ => {}
            }
        }

        let closest = table.closest(&target, 3);
        let ports: Vec<u16> = closest.iter().map(|c| c.addr.port()).collect();
        assert_eq!(ports, vec![0b0001, 0b0110, 0b1000]);
    }

    #[test]
    fn invariant_contact_bucket_matches_distance_msb() {
        let local = NodeId::new([0u8; 20]);
        let mut table = RoutingTable::new(local, 8);
        for id in 1..=20u8 {
            insert(&mut table, id);
        }
        for (idx, bucket) in table.buckets.iter().enumerate() {
            for c in bucket.contacts() {
                assert_eq!(local.distance(&c.node_id).bucket_index(), Some(idx));
            }
        }
    }

    #[test]
    fn bucket_capacity_and_uniqueness_hold() {
        let local = NodeId::new([0u8; 20]);
        let mut table = RoutingTable::new(local, 2);
        for id in 1..=10u8 {
            insert(&mut table, id);
        }
        for bucket in &table.buckets {
            assert!(bucket.len() <= 2);
            let mut seen = std::collections::HashSet::new();
            for c in bucket.contacts() {
                assert!(seen.insert(c.node_id));
            }
        }
    }
}
