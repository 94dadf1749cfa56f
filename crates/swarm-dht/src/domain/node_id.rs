//! 160-bit node identifiers and the Kademlia XOR distance metric.

use std::fmt;

/// A 160-bit node identifier, shared keyspace with info-hashes.
///
/// Generated uniformly at random at startup and stable for the node's
/// lifetime (see [`NodeId::random`]).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct NodeId(pub [u8; 20]);

impl NodeId {
    /// Wrap raw bytes as a node id.
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Generate a node id uniformly at random.
    pub fn random() -> Self {
        let mut bytes = [0u8; 20];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
        Self(bytes)
    }

    pub fn zero() -> Self {
        Self([0u8; 20])
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// XOR distance between two ids.
    pub fn distance(&self, other: &NodeId) -> Distance {
        let mut out = [0u8; 20];
        for i in 0..20 {
            out[i] = self.0[i] ^ other.0[i];
        }
        Distance(out)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId(")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

/// XOR distance between two [`NodeId`]s.
///
/// Stored big-endian, byte-for-byte identical to the XOR of the two ids.
/// Lexicographic (byte-wise) comparison of a big-endian byte string is
/// equivalent to comparing the two as unsigned 160-bit integers, so `Ord`
/// gives the correct Kademlia distance ordering without a bignum type.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Distance(pub [u8; 20]);

impl Distance {
    pub fn zero() -> Self {
        Self([0u8; 20])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// 0-based index of the most significant set bit (0..=159).
    ///
    /// `None` for a zero distance (self-comparison), which has no bucket.
    pub fn bucket_index(&self) -> Option<usize> {
        for (byte_idx, byte) in self.0.iter().enumerate() {
            if *byte != 0 {
                let leading = byte.leading_zeros() as usize;
                // byte 0 is the most significant byte of the 160-bit value.
                return Some(byte_idx * 8 + leading);
            }
        }
        None
    }
}

impl fmt::Debug for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Distance(")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_symmetric() {
        let a = NodeId::new([0xAA; 20]);
        let b = NodeId::new([0x55; 20]);
        assert_eq!(a.distance(&b).0, b.distance(&a).0);
    }

    #[test]
    fn self_distance_has_no_bucket() {
        let a = NodeId::new([0x12; 20]);
        assert!(a.distance(&a).is_zero());
        assert_eq!(a.distance(&a).bucket_index(), None);
    }

    #[test]
    fn bucket_index_is_msb_of_distance() {
        let mut low = [0u8; 20];
        low[19] = 0b0000_0001; // differ only in the lowest bit
        let a = NodeId::zero();
        let b = NodeId::new(low);
        assert_eq!(a.distance(&b).bucket_index(), Some(159));

        let mut high = [0u8; 20];
        high[0] = 0b1000_0000; // differ in the top bit
        let c = NodeId::new(high);
        assert_eq!(a.distance(&c).bucket_index(), Some(0));
    }

    #[test]
    fn ordering_matches_integer_distance() {
        // NodeIds {0b0001, 0b0110, 0b1000, 0b1111}; target = 0b0000.
        let target = NodeId::new([0u8; 20]);
        let mk = |v: u8| {
            let mut b = [0u8; 20];
            b[19] = v;
            NodeId::new(b)
        };
        let n1 = mk(0b0001);
        let n2 = mk(0b0110);
        let n3 = mk(0b1000);
        let n4 = mk(0b1111);

        let mut nodes = vec![n4, n1, n3, n2];
        nodes.sort_by_key(|n| n.distance(&target));
        assert_eq!(nodes, vec![n1, n2, n3, n4]);
    }
}
