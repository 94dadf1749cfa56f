//! # Content Distribution Node — DHT + Peer Wire Core
//!
//! This crate implements the two tightly-coupled subsystems that carry a
//! BitTorrent-style content distribution node:
//!
//! - [`domain`]: the Kademlia DHT domain model — 160-bit node identifiers,
//!   the XOR distance metric, k-buckets, the routing table, the local peer
//!   store, and piece storage with SHA-1 verification.
//! - [`rpc`]: the four-verb DHT RPC protocol (`ping`, `find_node`,
//!   `get_peers`, `announce_peer`) over a single demultiplexed UDP socket,
//!   plus the α-parallel iterative lookup.
//! - [`wire`]: the BitTorrent peer-wire handshake and message codec, and the
//!   per-connection choke/interest state machine.
//! - [`scheduler`]: rarest-first piece/block selection and request
//!   pipelining across connected peers.
//!
//! Metainfo (torrent file) parsing, the CLI, and process wiring are
//! deliberately not here — [`Manifest`] is the narrow slice of a decoded
//! metainfo dictionary this crate is allowed to depend on; everything else
//! is the embedder's job (see `swarm-noded`).

pub mod domain;
pub mod manifest;
pub mod ports;
pub mod rpc;
pub mod scheduler;
pub mod wire;

mod node;

pub use domain::{
    BlockStatus, Contact, Distance, KBucket, KademliaConfig, LocalPeerStore, NodeId,
    PeerConnectionState, RoutingTable, Storage,
};
pub use manifest::Manifest;
pub use node::{Node, NodeError};
