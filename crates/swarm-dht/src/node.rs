//! `Node`: the process-wide object that owns every piece of mutable state
//! described in §3 — the routing table, the local peer store, piece
//! storage, and the set of live peer connections — reached only through
//! this handle, never through module-level statics (§9's "global mutable
//! state" redesign note).
//!
//! Construction has one chicken-and-egg wrinkle worth calling out: the
//! k-bucket eviction [`Prober`] needs a transport to issue its `ping`, but
//! [`UdpRpcTransport::bind`] needs a [`RequestHandler`] (the [`RpcServer`])
//! up front, and the server needs a prober. [`DeferredProber`] breaks the
//! cycle by resolving to the real transport the instant it's bound, which
//! happens before this node can possibly receive a request that triggers a
//! bucket-full eviction probe (an empty routing table can't have a full
//! bucket).

use std::net::SocketAddrV4;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex as AsyncMutex, OnceCell};
use tokio::task::JoinHandle;

use crate::domain::{KademliaConfig, LocalPeerStore, NodeId, RoutingTable, Storage};
use crate::manifest::Manifest;
use crate::ports::Prober;
use crate::rpc::server::{RpcClient, RpcServer, TransportProber};
use crate::rpc::transport::RpcTransport;
use crate::rpc::{DhtRequest, GetPeersOutcome, NodeDescriptor, UdpRpcTransport};
use crate::rpc::lookup::{announce_to_closest, iterative_find_node, iterative_get_peers};
use crate::scheduler::DownloadScheduler;
use crate::wire::{generate_peer_id, perform_handshake, spawn as spawn_peer_connection};

/// Fatal startup failures: socket bind failures, per §7's "Fatal" error
/// kind. The embedder (`swarm-noded`) is expected to log these at
/// `tracing::error!` and terminate the process.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("failed to bind DHT datagram socket: {0}")]
    DhtBind(std::io::Error),
    #[error("failed to bind peer-wire listener: {0}")]
    PeerListenerBind(std::io::Error),
}

struct DeferredProber {
    transport: OnceCell<Arc<UdpRpcTransport>>,
}

#[async_trait]
impl Prober for DeferredProber {
    async fn is_alive(&self, addr: SocketAddrV4) -> bool {
        match self.transport.get() {
            Some(transport) => transport.call(addr, DhtRequest::Ping).await.is_ok(),
            // A probe before the transport finished binding can't happen in
            // practice (no contacts exist yet to fill a bucket), but if it
            // somehow did, treating the probe target as dead is the safe
            // default: it favors admitting the new contact over trusting an
            // unreachable prober.
            None => false,
        }
    }
}

/// A running Kademlia + peer-wire node. Exactly one per process.
pub struct Node {
    node_id: NodeId,
    peer_id: [u8; 20],
    manifest: Manifest,
    config: KademliaConfig,
    table: Arc<SyncMutex<RoutingTable>>,
    peer_store: Arc<SyncMutex<LocalPeerStore>>,
    storage: Arc<SyncMutex<Storage>>,
    transport: Arc<UdpRpcTransport>,
    client: RpcClient<UdpRpcTransport>,
    prober: Arc<dyn Prober>,
    scheduler: Arc<AsyncMutex<DownloadScheduler>>,
    tcp_listen_addr: SocketAddrV4,
    background: SyncMutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Bind the DHT datagram socket and the peer-wire TCP listener, wire up
    /// the RPC server and download scheduler, and spawn the background
    /// tasks described in §5: one UDP receive-and-dispatch loop (owned by
    /// the transport itself), one TCP accept loop, and one scheduler tick
    /// loop.
    #[tracing::instrument(skip(manifest), fields(dht = %dht_addr, peers = %tcp_addr))]
    pub async fn init(dht_addr: SocketAddrV4, tcp_addr: SocketAddrV4, manifest: Manifest, config: KademliaConfig) -> Result<Arc<Node>, NodeError> {
        let node_id = NodeId::random();
        let peer_id = generate_peer_id();

        let table = Arc::new(SyncMutex::new(RoutingTable::new(node_id, config.k)));
        let peer_store = Arc::new(SyncMutex::new(LocalPeerStore::new()));
        let storage = Arc::new(SyncMutex::new(Storage::new(manifest.piece_length, manifest.piece_hashes.clone())));

        let deferred_prober = Arc::new(DeferredProber { transport: OnceCell::new() });
        let server = Arc::new(RpcServer::new(node_id, table.clone(), peer_store.clone(), deferred_prober.clone(), config.clone()));

        let transport = UdpRpcTransport::bind(dht_addr, node_id, config.rpc_timeout, server.clone())
            .await
            .map_err(NodeError::DhtBind)?;
        // Safe to ignore: nothing else could have raced to set this cell
        // between `bind` returning and this line.
        let _ = deferred_prober.transport.set(transport.clone());

        let prober: Arc<dyn Prober> = Arc::new(TransportProber::new(transport.clone()));
        let client = RpcClient::new(transport.clone(), table.clone(), prober.clone());

        let tcp_listener = TcpListener::bind(tcp_addr).await.map_err(NodeError::PeerListenerBind)?;
        let tcp_listen_addr = match tcp_listener.local_addr().map_err(NodeError::PeerListenerBind)? {
            std::net::SocketAddr::V4(v4) => v4,
            std::net::SocketAddr::V6(_) => tcp_addr,
        };

        let scheduler = Arc::new(AsyncMutex::new(DownloadScheduler::new(manifest.clone(), storage.clone())));

        let node = Arc::new(Node {
            node_id,
            peer_id,
            manifest,
            config,
            table,
            peer_store,
            storage,
            transport,
            client,
            prober,
            scheduler,
            tcp_listen_addr,
            background: SyncMutex::new(Vec::new()),
        });

        node.spawn_accept_loop(tcp_listener);
        node.spawn_tick_loop();

        Ok(node)
    }

    pub fn local_id(&self) -> NodeId {
        self.node_id
    }

    pub fn peer_id(&self) -> [u8; 20] {
        self.peer_id
    }

    pub fn tcp_listen_addr(&self) -> SocketAddrV4 {
        self.tcp_listen_addr
    }

    /// The bound DHT datagram socket's local address. Mainly useful in
    /// tests, where nodes bind to port 0 and later need to hand their
    /// actual address to a peer as a bootstrap seed.
    pub fn dht_listen_addr(&self) -> SocketAddrV4 {
        match self.transport.local_addr().expect("bound socket always has a local address") {
            std::net::SocketAddr::V4(v4) => v4,
            std::net::SocketAddr::V6(_) => unreachable!("DHT transport is always bound to an IPv4 address"),
        }
    }

    pub fn routing_table_len(&self) -> usize {
        self.table.lock().len()
    }

    /// §6 bootstrap: ping each seed; for every seed that answers, learn its
    /// node id from the reply envelope, admit it as a contact, and once at
    /// least one seed has answered, run a self-lookup to populate nearby
    /// buckets.
    pub async fn bootstrap(self: &Arc<Self>, seeds: &[SocketAddrV4]) {
        let mut any_replied = false;
        for &seed in seeds {
            match self.transport.call_capturing_sender(seed, DhtRequest::Ping).await {
                Ok((remote_id, _pong)) => {
                    any_replied = true;
                    crate::rpc::server::insert_contact(&self.table, self.prober.as_ref(), crate::domain::Contact::new(remote_id, seed)).await;
                }
                Err(e) => {
                    tracing::debug!(%seed, error = %e, "bootstrap seed did not respond");
                }
            }
        }
        if any_replied {
            let _ = self.find_node(self.node_id).await;
        }
    }

    /// α-parallel iterative node lookup (§4.5).
    pub async fn find_node(&self, target: NodeId) -> Vec<NodeDescriptor> {
        iterative_find_node(&self.client, &self.table, self.node_id, target, &self.config).await
    }

    /// α-parallel iterative peer lookup (§4.5).
    pub async fn get_peers(&self, info_hash: NodeId) -> GetPeersOutcome {
        iterative_get_peers(&self.client, &self.table, self.node_id, info_hash, &self.config).await
    }

    /// Announce this node as a holder of `info_hash` to the k nodes closest
    /// to it, per S4: look the swarm up first, then announce to what the
    /// lookup returned.
    pub async fn announce(&self, info_hash: NodeId, peer_port: u16) {
        let closest = self.find_node(info_hash).await;
        announce_to_closest(&self.client, &closest, info_hash, peer_port).await;
    }

    /// Dial an outbound peer-wire connection, perform the handshake, and
    /// register it with the download scheduler. Per §4.7/S6 a mismatched
    /// info_hash aborts the connection before it is ever registered.
    pub async fn connect_peer(self: &Arc<Self>, addr: SocketAddrV4) -> std::io::Result<()> {
        let stream = TcpStream::connect(addr).await?;
        let (stream, remote) = perform_handshake(stream, self.manifest.info_hash, self.peer_id).await?;
        let (events_tx, events_rx) = tokio::sync::mpsc::channel(64);
        let handle = spawn_peer_connection(stream, remote, events_tx);
        self.scheduler.lock().await.add_peer(handle, events_rx).await;
        Ok(())
    }

    fn spawn_accept_loop(self: &Arc<Self>, listener: TcpListener) {
        let node = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                let (stream, _from) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "peer-wire accept failed");
                        continue;
                    }
                };
                let node = node.clone();
                tokio::spawn(async move {
                    match perform_handshake(stream, node.manifest.info_hash, node.peer_id).await {
                        Ok((stream, remote)) => {
                            let (events_tx, events_rx) = tokio::sync::mpsc::channel(64);
                            let handle = spawn_peer_connection(stream, remote, events_tx);
                            node.scheduler.lock().await.add_peer(handle, events_rx).await;
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "inbound handshake failed, connection dropped");
                        }
                    }
                });
            }
        });
        self.background.lock().push(handle);
    }

    fn spawn_tick_loop(self: &Arc<Self>) {
        let node = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(250));
            loop {
                interval.tick().await;
                let mut scheduler = node.scheduler.lock().await;
                scheduler.drain_events().await;
                scheduler.tick().await;
            }
        });
        self.background.lock().push(handle);
    }

    /// Abort the background accept and scheduling loops. The bound UDP
    /// socket's own receive loop is owned internally by the transport and
    /// outlives this call; dropping every `Arc<Node>`/`Arc<UdpRpcTransport>`
    /// reference is what actually tears it down.
    pub fn shutdown(&self) {
        for handle in self.background.lock().drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    async fn spin_up(seed_port: u16) -> Arc<Node> {
        let manifest = Manifest::single_file([1; 20], 16384, 16384, vec![[0; 20]; 1]);
        let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, seed_port);
        Node::init(addr, addr, manifest, KademliaConfig::for_testing()).await.unwrap()
    }

    #[tokio::test]
    async fn two_nodes_ping_each_other_via_bootstrap() {
        let a = spin_up(0).await;
        let b = spin_up(0).await;

        let b_dht_addr = b.dht_listen_addr();

        a.bootstrap(&[b_dht_addr]).await;
        assert_eq!(a.routing_table_len(), 1, "a should have learned b's contact from the ping reply");

        a.shutdown();
        b.shutdown();
    }

    #[tokio::test]
    async fn announce_then_get_peers_round_trips() {
        let a = spin_up(0).await;
        let b = spin_up(0).await;

        let b_dht_addr = b.dht_listen_addr();
        a.bootstrap(&[b_dht_addr]).await;

        let info_hash = NodeId::new([42; 20]);
        a.announce(info_hash, 6881).await;

        match b.get_peers(info_hash).await {
            GetPeersOutcome::Peers(peers) => {
                assert!(!peers.is_empty());
            }
            GetPeersOutcome::NodesOnly(_) => panic!("expected b to have the announced peer locally"),
        }

        a.shutdown();
        b.shutdown();
    }
}
