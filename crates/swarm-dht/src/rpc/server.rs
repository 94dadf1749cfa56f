//! Dispatch of the four RPC verbs, and the outbound half callers use.

use std::net::SocketAddrV4;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::{Contact, InsertStep, KademliaConfig, LocalPeerStore, NodeId, RoutingTable};
use crate::ports::Prober;

use super::message::{DhtRequest, DhtResponse, NodeDescriptor};
use super::transport::{RequestHandler, RpcError, RpcTransport};

/// Inserts `contact` into `table`, probing the bucket's oldest entry via
/// `prober` if (and only if) the target bucket is full.
///
/// This is the free function the design notes call for: the routing table
/// never calls the network layer itself, it only describes what probe is
/// needed; the caller (here) services it. Splitting the critical section
/// this way means the table's lock is never held across the probe's await.
pub async fn insert_contact(table: &Mutex<RoutingTable>, prober: &dyn Prober, contact: Contact) {
    let step = { table.lock().begin_insert(contact.clone()) };
    if let Ok(InsertStep::NeedsProbe { bucket_index, oldest }) = step {
        let alive = prober.is_alive(oldest.addr).await;
        table.lock().resolve_insert(bucket_index, contact, alive);
    }
}

/// A [`Prober`] backed by a real RPC transport: probing a contact is just
/// issuing a `ping` and seeing whether it answers within the RPC deadline.
pub struct TransportProber<T: RpcTransport> {
    transport: Arc<T>,
}

impl<T: RpcTransport> TransportProber<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl<T: RpcTransport> Prober for TransportProber<T> {
    async fn is_alive(&self, addr: SocketAddrV4) -> bool {
        self.transport.call(addr, DhtRequest::Ping).await.is_ok()
    }
}

/// Answers inbound `ping` / `find_node` / `get_peers` / `announce_peer`
/// requests. Every verb updates the routing table with the sender before
/// computing its result.
pub struct RpcServer {
    local_id: NodeId,
    table: Arc<Mutex<RoutingTable>>,
    peer_store: Arc<Mutex<LocalPeerStore>>,
    prober: Arc<dyn Prober>,
    config: KademliaConfig,
}

impl RpcServer {
    pub fn new(
        local_id: NodeId,
        table: Arc<Mutex<RoutingTable>>,
        peer_store: Arc<Mutex<LocalPeerStore>>,
        prober: Arc<dyn Prober>,
        config: KademliaConfig,
    ) -> Self {
        Self {
            local_id,
            table,
            peer_store,
            prober,
            config,
        }
    }

    fn descriptors(contacts: Vec<Contact>) -> Vec<NodeDescriptor> {
        contacts
            .into_iter()
            .map(|c| NodeDescriptor {
                node_id: c.node_id,
                addr: c.addr,
            })
            .collect()
    }

    async fn touch_sender(&self, sender: NodeId, from: SocketAddrV4) {
        insert_contact(&self.table, self.prober.as_ref(), Contact::new(sender, from)).await;
    }
}

#[async_trait]
impl RequestHandler for RpcServer {
    #[tracing::instrument(skip(self), fields(local = ?self.local_id))]
    async fn handle(&self, sender: NodeId, from: SocketAddrV4, request: DhtRequest) -> DhtResponse {
        self.touch_sender(sender, from).await;

        match request {
            DhtRequest::Ping => DhtResponse::Pong,

            DhtRequest::FindNode { target } => {
                let closest = self.table.lock().closest(&target, self.config.k);
                DhtResponse::Nodes(Self::descriptors(closest))
            }

            DhtRequest::GetPeers { info_hash } => {
                let local = self.peer_store.lock().get(&info_hash);
                match local {
                    Some(values) => DhtResponse::Values(values),
                    None => {
                        let closest = self.table.lock().closest(&info_hash, self.config.k);
                        DhtResponse::Nodes(Self::descriptors(closest))
                    }
                }
            }

            DhtRequest::AnnouncePeer { info_hash, peer_port } => {
                let (closest, table_len) = {
                    let table = self.table.lock();
                    (table.closest(&info_hash, self.config.k), table.len())
                };
                let within_horizon = table_len < self.config.k || {
                    let my_distance = self.local_id.distance(&info_hash);
                    let farthest = closest.iter().map(|c| c.node_id.distance(&info_hash)).max();
                    match farthest {
                        Some(farthest) => my_distance <= farthest,
                        None => true,
                    }
                };
                if within_horizon {
                    self.peer_store.lock().announce(info_hash, SocketAddrV4::new(*from.ip(), peer_port));
                }
                DhtResponse::Ok
            }
        }
    }
}

/// Outbound RPC calls issued by this node, wired to a concrete transport.
pub struct RpcClient<T: RpcTransport> {
    transport: Arc<T>,
    table: Arc<Mutex<RoutingTable>>,
    prober: Arc<dyn Prober>,
}

impl<T: RpcTransport> RpcClient<T> {
    pub fn new(transport: Arc<T>, table: Arc<Mutex<RoutingTable>>, prober: Arc<dyn Prober>) -> Self {
        Self { transport, table, prober }
    }

    pub async fn find_node(&self, remote_id: NodeId, target_addr: SocketAddrV4, target: NodeId) -> Result<Vec<NodeDescriptor>, RpcError> {
        let response = self.transport.call(target_addr, DhtRequest::FindNode { target }).await?;
        insert_contact(&self.table, self.prober.as_ref(), Contact::new(remote_id, target_addr)).await;
        match response {
            DhtResponse::Nodes(nodes) => Ok(nodes),
            _ => Ok(Vec::new()),
        }
    }

    pub async fn get_peers(
        &self,
        remote_id: NodeId,
        target_addr: SocketAddrV4,
        info_hash: NodeId,
    ) -> Result<(Vec<NodeDescriptor>, Vec<SocketAddrV4>), RpcError> {
        let response = self.transport.call(target_addr, DhtRequest::GetPeers { info_hash }).await?;
        insert_contact(&self.table, self.prober.as_ref(), Contact::new(remote_id, target_addr)).await;
        match response {
            DhtResponse::Nodes(nodes) => Ok((nodes, Vec::new())),
            DhtResponse::Values(values) => Ok((Vec::new(), values)),
            _ => Ok((Vec::new(), Vec::new())),
        }
    }

    pub async fn announce_peer(&self, target_addr: SocketAddrV4, info_hash: NodeId, peer_port: u16) -> Result<(), RpcError> {
        self.transport
            .call(target_addr, DhtRequest::AnnouncePeer { info_hash, peer_port })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::AlwaysDead;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn handle_ping_inserts_sender_before_responding() {
        let local = NodeId::new([0; 20]);
        let table = Arc::new(Mutex::new(RoutingTable::new(local, 8)));
        let store = Arc::new(Mutex::new(LocalPeerStore::new()));
        let server = RpcServer::new(local, table.clone(), store, Arc::new(AlwaysDead), KademliaConfig::default());

        let sender = NodeId::new([1; 20]);
        let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9000);
        let response = server.handle(sender, addr, DhtRequest::Ping).await;
        assert!(matches!(response, DhtResponse::Pong));
        assert!(table.lock().contains(&sender));
    }

    /// §4.4 — announce_peer accepted unconditionally below k contacts.
    #[tokio::test]
    async fn announce_peer_accepted_when_table_below_k() {
        let local = NodeId::new([0; 20]);
        let table = Arc::new(Mutex::new(RoutingTable::new(local, 8)));
        let store = Arc::new(Mutex::new(LocalPeerStore::new()));
        let server = RpcServer::new(local, table, store.clone(), Arc::new(AlwaysDead), KademliaConfig::default());

        let info_hash = NodeId::new([7; 20]);
        let sender = NodeId::new([1; 20]);
        let addr = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 6000);
        let response = server
            .handle(sender, addr, DhtRequest::AnnouncePeer { info_hash, peer_port: 6881 })
            .await;
        assert!(matches!(response, DhtResponse::Ok));
        assert_eq!(
            store.lock().get(&info_hash).unwrap(),
            vec![SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 6881)]
        );
    }
}
