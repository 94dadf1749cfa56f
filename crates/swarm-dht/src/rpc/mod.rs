//! The Kademlia RPC layer: wire messages, the UDP transport, request
//! dispatch, and iterative lookup.

pub mod lookup;
pub mod message;
pub mod server;
pub mod transport;

pub use lookup::{announce_to_closest, iterative_find_node, iterative_get_peers, GetPeersOutcome};
pub use message::{DhtDatagram, DhtRequest, DhtResponse, NodeDescriptor};
pub use server::{insert_contact, RpcClient, RpcServer, TransportProber};
pub use transport::{RequestHandler, RpcError, RpcTransport, UdpRpcTransport};
