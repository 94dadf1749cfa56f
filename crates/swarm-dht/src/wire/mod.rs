//! The BitTorrent peer-wire protocol: handshake, message codec, and the
//! per-connection actor that drives a single `TcpStream`.

use thiserror::Error;

pub mod codec;
pub mod connection;
pub mod handshake;

pub use codec::PeerMessage;
pub use connection::{handshake as perform_handshake, spawn, CloseReason, PeerCommand, PeerEvent, PeerHandle};
pub use handshake::{generate_peer_id, Handshake};

/// Peer-wire failures: a protocol violation at handshake time (§7), or a
/// transport I/O error reading/writing the length-prefixed message stream.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("handshake info_hash mismatch: connection aborted, peer contact not recorded")]
    HandshakeMismatch,
    #[error("malformed handshake (bad pstrlen or short read)")]
    MalformedHandshake,
    #[error("handshake did not complete within the deadline")]
    HandshakeTimeout,
    #[error("unknown peer-wire message id {0}")]
    UnknownMessageId(u8),
    #[error("peer-wire I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<WireError> for std::io::Error {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Io(e) => e,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}
