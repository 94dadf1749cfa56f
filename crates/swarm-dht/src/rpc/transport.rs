//! Single-socket, demultiplexed UDP RPC transport.
//!
//! One `tokio::net::UdpSocket` serves both directions: a dedicated receive
//! loop demultiplexes every inbound datagram by `(transaction_id,
//! remote_addr)`, routing replies to waiting callers and fresh requests to
//! the [`RequestHandler`]. This is option (a) of the two transports
//! permitted by the concurrency model — an outbound RPC's reply can never
//! be stolen by the inbound server's own `recv_from`, because there is only
//! ever one `recv_from` call site.

use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;

use crate::domain::NodeId;

use super::message::{DhtDatagram, DhtRequest, DhtResponse, Envelope};

const MAX_DATAGRAM: usize = 4096;

/// Transport-level failures. A timeout, an unreachable destination, or a
/// malformed reply are all folded into `NoResponse` at the transport
/// boundary — per spec, the caller must not add the destination to the
/// routing table on this path, and may treat it as evidence of death in an
/// eviction probe.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("no response from peer")]
    NoResponse,
    #[error("I/O error: {0}")]
    Io(String),
}

/// Handles an inbound request and produces the response to send back.
/// Implemented by [`crate::rpc::server::RpcServer`]; every verb must update
/// the routing table with the sender before computing its result, which the
/// handler implementation — not the transport — is responsible for.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, sender: NodeId, from: SocketAddrV4, request: DhtRequest) -> DhtResponse;
}

/// Abstract RPC transport so the lookup layer and RPC server can be tested
/// against an in-memory double instead of real sockets.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(&self, target: SocketAddrV4, body: DhtRequest) -> Result<DhtResponse, RpcError>;
}

type PendingKey = (u16, SocketAddrV4);

pub struct UdpRpcTransport {
    socket: Arc<UdpSocket>,
    local_id: NodeId,
    next_txn: AtomicU16,
    pending: Mutex<HashMap<PendingKey, oneshot::Sender<(NodeId, DhtResponse)>>>,
    timeout: Duration,
}

impl UdpRpcTransport {
    /// Bind the single listening datagram socket and spawn its receive
    /// loop. `handler` answers inbound requests; replies to our own
    /// outbound calls are routed back to [`RpcTransport::call`] callers.
    pub async fn bind(
        addr: SocketAddrV4,
        local_id: NodeId,
        timeout: Duration,
        handler: Arc<dyn RequestHandler>,
    ) -> std::io::Result<Arc<Self>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let transport = Arc::new(Self {
            socket,
            local_id,
            next_txn: AtomicU16::new(0),
            pending: Mutex::new(HashMap::new()),
            timeout,
        });
        transport.clone().spawn_recv_loop(handler);
        Ok(transport)
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.socket.local_addr()
    }

    fn spawn_recv_loop(self: Arc<Self>, handler: Arc<dyn RequestHandler>) {
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                let (len, from) = match self.socket.recv_from(&mut buf).await {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "DHT socket recv_from failed");
                        continue;
                    }
                };
                let std::net::SocketAddr::V4(from_v4) = from else {
                    continue; // IPv6 out of scope for this spec's SocketAddrV4 model
                };
                let datagram = match DhtDatagram::decode(&buf[..len]) {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::debug!(error = %e, %from_v4, "dropping malformed DHT datagram");
                        continue;
                    }
                };

                match datagram {
                    DhtDatagram::Response(env) => {
                        let key = (env.transaction_id, from_v4);
                        if let Some(sender) = self.pending.lock().remove(&key) {
                            let _ = sender.send((env.sender, env.body));
                        }
                    }
                    DhtDatagram::Request(env) => {
                        let this = self.clone();
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            let response = handler.handle(env.sender, from_v4, env.body).await;
                            let reply = DhtDatagram::Response(Envelope {
                                transaction_id: env.transaction_id,
                                sender: this.local_id,
                                body: response,
                            });
                            if let Err(e) = this.socket.send_to(&reply.encode(), from_v4).await {
                                tracing::warn!(error = %e, %from_v4, "failed to send DHT reply");
                            }
                        });
                    }
                }
            }
        });
    }
}

impl UdpRpcTransport {
    /// Issue a request and return both the response and the responder's
    /// node id (read off the reply envelope's `sender` field). Used by
    /// bootstrap, where the seed's id is not yet known from any prior
    /// `find_node`/`get_peers` reply and must be learned from the `ping`
    /// itself.
    pub async fn call_capturing_sender(&self, target: SocketAddrV4, body: DhtRequest) -> Result<(NodeId, DhtResponse), RpcError> {
        let transaction_id = self.next_txn.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert((transaction_id, target), tx);

        let request = DhtDatagram::Request(Envelope {
            transaction_id,
            sender: self.local_id,
            body,
        });
        if let Err(e) = self.socket.send_to(&request.encode(), target).await {
            self.pending.lock().remove(&(transaction_id, target));
            return Err(RpcError::Io(e.to_string()));
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(pair)) => Ok(pair),
            _ => {
                self.pending.lock().remove(&(transaction_id, target));
                Err(RpcError::NoResponse)
            }
        }
    }
}

#[async_trait]
impl RpcTransport for UdpRpcTransport {
    async fn call(&self, target: SocketAddrV4, body: DhtRequest) -> Result<DhtResponse, RpcError> {
        self.call_capturing_sender(target, body).await.map(|(_, response)| response)
    }
}
