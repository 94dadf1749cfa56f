//! Pure per-connection choke/interest state for the peer-wire protocol.
//!
//! This holds the decisions (are we interested? is a request overdue?); the
//! actual socket I/O lives in [`crate::wire::connection`]. Keeping the two
//! separate means the request-pipelining policy can be unit tested without
//! a socket.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::storage::Bitfield;

/// One outstanding block request, keyed by `(piece_index, block_index)`.
pub type BlockKey = (u32, u32);

/// Choke/interest flags, pending requests, and rolling rates for one peer
/// connection. All four flags are initialized to `(true, false, true,
/// false)`: we start choking them and uninterested, and assume they start
/// choking us and uninterested, until told otherwise.
pub struct PeerConnectionState {
    pub am_choking: bool,
    pub am_interested: bool,
    pub peer_choking: bool,
    pub peer_interested: bool,

    remote_bitfield: Bitfield,
    pending_requests: HashMap<BlockKey, Instant>,
    download_rate: f64,
    upload_rate: f64,
    last_active: Instant,
}

impl PeerConnectionState {
    pub fn new(num_pieces: usize) -> Self {
        Self {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
            remote_bitfield: Bitfield::new(num_pieces),
            pending_requests: HashMap::new(),
            download_rate: 0.0,
            upload_rate: 0.0,
            last_active: Instant::now(),
        }
    }

    pub fn remote_bitfield(&self) -> &Bitfield {
        &self.remote_bitfield
    }

    pub fn last_active(&self) -> Instant {
        self.last_active
    }

    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    pub fn download_rate(&self) -> f64 {
        self.download_rate
    }

    pub fn upload_rate(&self) -> f64 {
        self.upload_rate
    }

    /// Apply a received `bitfield` message. Returns `true` if the peer now
    /// reveals at least one piece we lack (caller should become interested).
    pub fn on_bitfield(&mut self, bytes: &[u8], num_pieces: usize, local: &Bitfield) -> bool {
        self.remote_bitfield = Bitfield::from_bytes(bytes, num_pieces);
        self.touch();
        self.reveals_wanted_piece(local)
    }

    /// Apply a received `have(piece_index)` message. Returns `true` if this
    /// piece is one we lack (caller should become interested if not
    /// already).
    pub fn on_have(&mut self, piece_index: usize, local: &Bitfield) -> bool {
        self.remote_bitfield.set(piece_index);
        self.touch();
        !local.get(piece_index) && self.remote_bitfield.get(piece_index)
    }

    /// Whether the peer's last-known bitfield still reveals a piece `local`
    /// lacks. Re-checked after every local piece commit so `am_interested`
    /// can drop back to `false` once a peer has nothing left we want.
    pub fn reveals_wanted_piece(&self, local: &Bitfield) -> bool {
        (0..self.remote_bitfield.len()).any(|i| self.remote_bitfield.get(i) && !local.get(i))
    }

    /// Requests may be sent only when the peer isn't choking us and we're
    /// interested in them.
    pub fn can_request(&self) -> bool {
        !self.peer_choking && self.am_interested
    }

    pub fn pending_count(&self) -> usize {
        self.pending_requests.len()
    }

    pub fn has_pending(&self, key: BlockKey) -> bool {
        self.pending_requests.contains_key(&key)
    }

    pub fn record_request(&mut self, key: BlockKey) {
        self.pending_requests.insert(key, Instant::now());
        self.touch();
    }

    /// Match a received `piece` message to its pending request. Returns
    /// `true` if a matching request existed (and was removed); the caller
    /// should discard the block data on `false`.
    pub fn record_received(&mut self, key: BlockKey) -> bool {
        self.touch();
        self.pending_requests.remove(&key).is_some()
    }

    /// Requests older than `timeout`: removed from `pending_requests` so
    /// the caller can re-enter the block into the scheduler.
    pub fn sweep_timed_out(&mut self, timeout: Duration) -> Vec<BlockKey> {
        let now = Instant::now();
        let expired: Vec<BlockKey> = self
            .pending_requests
            .iter()
            .filter(|(_, ts)| now.duration_since(**ts) > timeout)
            .map(|(k, _)| *k)
            .collect();
        for key in &expired {
            self.pending_requests.remove(key);
        }
        expired
    }

    pub fn cancel_all_pending(&mut self) -> Vec<BlockKey> {
        self.pending_requests.drain().map(|(k, _)| k).collect()
    }
}
