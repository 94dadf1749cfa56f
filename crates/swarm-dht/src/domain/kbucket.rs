//! A single k-bucket: a bounded LRU of contacts sharing one distance class.

use super::contact::Contact;
use super::node_id::NodeId;

/// Outcome of [`KBucket::add`].
///
/// `Full` is not an error — a bucket at capacity with a live head is the
/// designed outcome (§4.1): the caller must probe the oldest contact and
/// report the result back via [`KBucket::resolve_eviction`] before the
/// candidate is admitted or dropped.
#[derive(Debug)]
pub enum Admission {
    /// `node_id` already present: moved to the tail (most recently seen).
    Refreshed,
    /// Bucket had room: appended to the tail.
    Inserted,
    /// Bucket is at capacity; `oldest` must be probed for liveness.
    Full { oldest: Contact },
}

/// Ordered sequence of at most `k` contacts. Insertion order is LRU order
/// (head = oldest / least-recently-seen, tail = most-recently-seen).
#[derive(Debug, Clone)]
pub struct KBucket {
    k: usize,
    contacts: Vec<Contact>,
}

impl KBucket {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            contacts: Vec::with_capacity(k),
        }
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    /// Admit `contact` per the §4.1 policy. Does not itself perform I/O.
    pub fn add(&mut self, contact: Contact) -> Admission {
        if let Some(pos) = self.contacts.iter().position(|c| c.node_id == contact.node_id) {
            self.contacts.remove(pos);
            self.contacts.push(contact);
            return Admission::Refreshed;
        }

        if self.contacts.len() < self.k {
            self.contacts.push(contact);
            return Admission::Inserted;
        }

        Admission::Full {
            oldest: self.contacts[0].clone(),
        }
    }

    /// Resolve a [`Admission::Full`] once the oldest contact has been
    /// probed. Returns `true` iff `candidate` was admitted.
    ///
    /// Per §4.1, if the probe reports the oldest contact alive, the new
    /// candidate is dropped by design; the spec allows (but does not
    /// require) the head to be promoted on a successful probe, so we leave
    /// bucket order untouched in that case.
    pub fn resolve_eviction(&mut self, candidate: Contact, oldest_alive: bool) -> bool {
        if oldest_alive {
            return false;
        }
        if !self.contacts.is_empty() {
            self.contacts.remove(0);
        }
        self.contacts.push(candidate);
        true
    }

    pub fn remove(&mut self, node_id: &NodeId) -> Option<Contact> {
        let pos = self.contacts.iter().position(|c| &c.node_id == node_id)?;
        Some(self.contacts.remove(pos))
    }

    pub fn touch(&mut self, node_id: &NodeId) -> bool {
        if let Some(pos) = self.contacts.iter().position(|c| &c.node_id == node_id) {
            let mut contact = self.contacts.remove(pos);
            contact.touch();
            self.contacts.push(contact);
            true
        } else {
            false
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

    /// S1 — Bucket eviction, probe alive.
    #[test]
    fn full_bucket_keeps_head_when_probe_alive() {
        let mut bucket = KBucket::new(2);
        assert!(matches!(bucket.add(contact(1)), Admission::Inserted));
        assert!(matches!(bucket.add(contact(2)), Admission::Inserted));

        match bucket.add(contact(3)) {
            Admission::Full { oldest } => assert_eq!(oldest.node_id, NodeId::new([1; 20])),
            other => panic!("expected Full, got {other:?}"),
        }
        let admitted = bucket.resolve_eviction(contact(3), true);
        assert!(!admitted);

        let ids: Vec<_> = bucket.contacts().iter().map(|c| c.node_id).collect();
        assert_eq!(ids, vec![NodeId::new([1; 20]), NodeId::new([2; 20])]);
    }

    /// S1 — Bucket eviction, probe dead.
    #[test]
    fn full_bucket_evicts_head_when_probe_dead() {
        let mut bucket = KBucket::new(2);
        bucket.add(contact(1));
        bucket.add(contact(2));
        bucket.add(contact(3));
        let admitted = bucket.resolve_eviction(contact(3), false);
        assert!(admitted);

        let ids: Vec<_> = bucket.contacts().iter().map(|c| c.node_id).collect();
        assert_eq!(ids, vec![NodeId::new([2; 20]), NodeId::new([3; 20])]);
    }

    #[test]
    fn refreshing_moves_to_tail() {
        let mut bucket = KBucket::new(3);
        bucket.add(contact(1));
        bucket.add(contact(2));
        assert!(matches!(bucket.add(contact(1)), Admission::Refreshed));
        let ids: Vec<_> = bucket.contacts().iter().map(|c| c.node_id).collect();
        assert_eq!(ids, vec![NodeId::new([2; 20]), NodeId::new([1; 20])]);
    }
}
