//! The 68-byte BitTorrent peer-wire handshake.

use rand::Rng;

const PSTR: &[u8] = b"BitTorrent protocol";
const PSTRLEN: u8 = 19;
const HANDSHAKE_LEN: usize = 1 + 19 + 8 + 20 + 20;

/// A generated local peer id: the fixed `-PC0001-` client tag followed by
/// 12 random bytes, per the conventional Azureus-style peer id format.
pub fn generate_peer_id() -> [u8; 20] {
    let mut id = [0u8; 20];
    id[..8].copy_from_slice(b"-PC0001-");
    rand::thread_rng().fill(&mut id[8..]);
    id
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { info_hash, peer_id }
    }

    pub fn encode(&self) -> [u8; HANDSHAKE_LEN] {
        let mut out = [0u8; HANDSHAKE_LEN];
        out[0] = PSTRLEN;
        out[1..20].copy_from_slice(PSTR);
        // bytes 20..28 are the reserved extension-flag bytes, left zero:
        // this crate does not negotiate BEP extensions.
        out[28..48].copy_from_slice(&self.info_hash);
        out[48..68].copy_from_slice(&self.peer_id);
        out
    }

    /// Parse a handshake read off the wire. Rejects anything with the wrong
    /// `pstrlen`/`pstr`, but is otherwise permissive about the reserved
    /// bytes (unrecognized extension bits are simply ignored).
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HANDSHAKE_LEN {
            return None;
        }
        if bytes[0] != PSTRLEN || &bytes[1..20] != PSTR {
            return None;
        }
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&bytes[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&bytes[48..68]);
        Some(Self { info_hash, peer_id })
    }

    /// A handshake is only valid for a swarm if its info_hash matches the
    /// one we expect; per §4.6/S6 this is checked before anything else and
    /// any mismatch destroys the connection immediately.
    pub fn matches(&self, expected_info_hash: &[u8; 20]) -> bool {
        &self.info_hash == expected_info_hash
    }
}

pub const HANDSHAKE_LENGTH: usize = HANDSHAKE_LEN;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_wire_bytes() {
        let hs = Handshake::new([7; 20], generate_peer_id());
        let bytes = hs.encode();
        let back = Handshake::decode(&bytes).unwrap();
        assert_eq!(back, hs);
    }

    #[test]
    fn peer_id_carries_client_tag() {
        let id = generate_peer_id();
        assert_eq!(&id[..8], b"-PC0001-");
    }

    /// S6 — handshake with a mismatched info_hash is rejected.
    #[test]
    fn mismatched_info_hash_is_rejected() {
        let hs = Handshake::new([1; 20], generate_peer_id());
        let bytes = hs.encode();
        let decoded = Handshake::decode(&bytes).unwrap();
        assert!(!decoded.matches(&[2; 20]));
        assert!(decoded.matches(&[1; 20]));
    }

    #[test]
    fn rejects_wrong_protocol_string() {
        let mut bytes = Handshake::new([1; 20], generate_peer_id()).encode();
        bytes[1] = b'X';
        assert!(Handshake::decode(&bytes).is_none());
    }

    #[test]
    fn rejects_short_buffers() {
        assert!(Handshake::decode(&[0u8; 10]).is_none());
    }
}
