//! The four-verb DHT wire protocol.
//!
//! Encoded as a `bincode`-serialized, `serde`-derived tagged enum: a
//! self-describing record carrying a type tag, the sender's node id, and
//! type-specific fields, exactly as required. Bencode (the production
//! BitTorrent DHT's wire format) is not used here — interop with the public
//! network is explicitly flagged as non-mandatory; `serde` + `bincode` let
//! this reuse the same serialization stack as the rest of the workspace
//! instead of hand-rolling a second codec.

use std::net::SocketAddrV4;

use serde::{Deserialize, Serialize};

use crate::domain::NodeId;

/// A contact as it travels over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub node_id: NodeId,
    pub addr: SocketAddrV4,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DhtRequest {
    Ping,
    FindNode { target: NodeId },
    GetPeers { info_hash: NodeId },
    AnnouncePeer { info_hash: NodeId, peer_port: u16 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DhtResponse {
    Pong,
    Nodes(Vec<NodeDescriptor>),
    Values(Vec<SocketAddrV4>),
    Ok,
}

/// A request or response along with the sender's identity and the
/// transaction id used to demultiplex replies on the shared socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub transaction_id: u16,
    pub sender: NodeId,
    pub body: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DhtDatagram {
    Request(Envelope<DhtRequest>),
    Response(Envelope<DhtResponse>),
}

impl DhtDatagram {
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("DhtDatagram serialization cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn round_trips_through_bincode() {
        let msg = DhtDatagram::Request(Envelope {
            transaction_id: 7,
            sender: NodeId::new([1; 20]),
            body: DhtRequest::GetPeers {
                info_hash: NodeId::new([2; 20]),
            },
        });
        let bytes = msg.encode();
        let back = DhtDatagram::decode(&bytes).unwrap();
        match back {
            DhtDatagram::Request(env) => {
                assert_eq!(env.transaction_id, 7);
                assert!(matches!(env.body, DhtRequest::GetPeers { .. }));
            }
            _ => panic!("expected Request"),
        }
    }

    #[test]
    fn node_descriptor_round_trips() {
        let desc = NodeDescriptor {
            node_id: NodeId::new([9; 20]),
            addr: SocketAddrV4::new(Ipv4Addr::LOCALHOST, 6881),
        };
        let bytes = bincode::serialize(&desc).unwrap();
        let back: NodeDescriptor = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.node_id, desc.node_id);
        assert_eq!(back.addr, desc.addr);
    }
}
