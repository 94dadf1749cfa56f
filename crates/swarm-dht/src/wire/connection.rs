//! Per-connection actor: owns the socket and the handshake lifecycle.
//! Driven entirely by commands in and events out — per the design notes, a
//! connection never holds a back-reference to whatever owns it (the
//! scheduler); choke/interest bookkeeping and request pipelining live there,
//! keyed off the events this actor reports.

use std::time::Duration;

use tokio::io::{split, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::codec::PeerMessage;
use super::handshake::{Handshake, HANDSHAKE_LENGTH};
use super::WireError;

/// Requests can be forgotten after this long without a `piece` reply; the
/// scheduler re-issues them to (possibly) another peer.
pub const BLOCK_TIMEOUT: Duration = Duration::from_secs(60);
/// Send a keep-alive after this long without any outbound traffic.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(120);
/// Destroy the connection after this long with no inbound traffic at all.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(240);
/// §4.7/§5: the handshake must complete within this long or the connection
/// is aborted.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Commands the owner (the download scheduler) sends to a live connection.
#[derive(Debug, Clone)]
pub enum PeerCommand {
    Send(PeerMessage),
    Shutdown,
}

/// Events a connection reports upward. `Closed` is terminal: no further
/// events follow it and the command channel should be dropped.
#[derive(Debug)]
pub enum PeerEvent {
    Message(PeerMessage),
    Closed { reason: CloseReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    SocketError,
    IdleTimeout,
    Commanded,
}

/// Perform the handshake on a freshly connected or accepted socket. Per
/// §4.6/S6, a mismatched info_hash (or malformed handshake) destroys the
/// connection immediately — the caller never reaches [`spawn`] in that case.
pub async fn handshake(
    mut stream: TcpStream,
    our_info_hash: [u8; 20],
    our_peer_id: [u8; 20],
) -> Result<(TcpStream, Handshake), WireError> {
    match tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake_exchange(&mut stream, our_info_hash, our_peer_id)).await {
        Ok(result) => result.map(|remote| (stream, remote)),
        Err(_elapsed) => Err(WireError::HandshakeTimeout),
    }
}

async fn handshake_exchange(
    stream: &mut TcpStream,
    our_info_hash: [u8; 20],
    our_peer_id: [u8; 20],
) -> Result<Handshake, WireError> {
    use tokio::io::AsyncReadExt;

    let outbound = Handshake::new(our_info_hash, our_peer_id);
    stream.write_all(&outbound.encode()).await?;

    let mut buf = [0u8; HANDSHAKE_LENGTH];
    stream.read_exact(&mut buf).await?;
    let remote = Handshake::decode(&buf).ok_or(WireError::MalformedHandshake)?;

    if !remote.matches(&our_info_hash) {
        return Err(WireError::HandshakeMismatch);
    }
    Ok(remote)
}

/// A handle to a spawned connection actor: send commands, own the join
/// handle. Dropping `commands` does not stop the task; send [`PeerCommand::Shutdown`].
pub struct PeerHandle {
    pub remote_peer_id: [u8; 20],
    pub commands: mpsc::Sender<PeerCommand>,
    pub task: JoinHandle<()>,
}

/// Spawn the actor loop for an already-handshaked connection.
pub fn spawn(stream: TcpStream, remote: Handshake, events: mpsc::Sender<PeerEvent>) -> PeerHandle {
    let (tx, rx) = mpsc::channel(64);
    let peer_id = remote.peer_id;
    let task = tokio::spawn(run(stream, rx, events));
    PeerHandle {
        remote_peer_id: peer_id,
        commands: tx,
        task,
    }
}

async fn run(stream: TcpStream, mut commands: mpsc::Receiver<PeerCommand>, events: mpsc::Sender<PeerEvent>) {
    let (mut read_half, mut write_half): (ReadHalf<TcpStream>, WriteHalf<TcpStream>) = split(stream);
    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);

    let reason = loop {
        tokio::select! {
            biased;

            cmd = commands.recv() => {
                match cmd {
                    Some(PeerCommand::Shutdown) | None => break CloseReason::Commanded,
                    Some(PeerCommand::Send(msg)) => {
                        if msg.write_to(&mut write_half).await.is_err() {
                            break CloseReason::SocketError;
                        }
                    }
                }
            }

            msg = read_with_idle_timeout(&mut read_half) => {
                match msg {
                    Ok(Some(msg)) => {
                        if events.send(PeerEvent::Message(msg)).await.is_err() {
                            break CloseReason::Commanded;
                        }
                    }
                    Ok(None) => break CloseReason::IdleTimeout,
                    Err(_) => break CloseReason::SocketError,
                }
            }

            _ = keepalive.tick() => {
                if write_half.write_all(&PeerMessage::KeepAlive.encode()).await.is_err() {
                    break CloseReason::SocketError;
                }
            }
        }
    };

    let _ = events.send(PeerEvent::Closed { reason }).await;
}

async fn read_with_idle_timeout(read_half: &mut ReadHalf<TcpStream>) -> Result<Option<PeerMessage>, WireError> {
    match tokio::time::timeout(IDLE_TIMEOUT, PeerMessage::read_from(read_half)).await {
        Ok(Ok(msg)) => Ok(Some(msg)),
        Ok(Err(e)) => Err(e),
        Err(_elapsed) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::handshake::generate_peer_id;

    #[tokio::test]
    async fn handshake_exchange_succeeds_over_real_sockets() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let info_hash = [5u8; 20];

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            handshake(stream, info_hash, generate_peer_id()).await
        });

        let client_stream = TcpStream::connect(addr).await.unwrap();
        let client_result = handshake(client_stream, info_hash, generate_peer_id()).await;
        let server_result = server.await.unwrap();

        assert!(client_result.is_ok());
        assert!(server_result.is_ok());
    }

    #[tokio::test]
    async fn handshake_rejects_mismatched_info_hash() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            handshake(stream, [1u8; 20], generate_peer_id()).await
        });

        let client_stream = TcpStream::connect(addr).await.unwrap();
        let client_result = handshake(client_stream, [2u8; 20], generate_peer_id()).await;
        let server_result = server.await.unwrap();

        assert!(client_result.is_err());
        assert!(server_result.is_err());
    }

    #[tokio::test]
    async fn handshake_times_out_if_peer_never_sends_its_bytes() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            // Hold the socket open without ever writing the 68-byte handshake.
            stream
        });

        let client_stream = TcpStream::connect(addr).await.unwrap();
        let _peer_stream = server.await.unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            handshake(client_stream, [7u8; 20], generate_peer_id()),
        )
        .await
        .expect("handshake() itself must return well within the outer test timeout");

        assert!(matches!(result, Err(WireError::HandshakeTimeout)));
    }

    #[tokio::test]
    async fn spawned_connection_round_trips_a_message_and_reports_events() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let info_hash = [3u8; 20];

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            handshake(stream, info_hash, generate_peer_id()).await.unwrap()
        });
        let client_stream = TcpStream::connect(addr).await.unwrap();
        let (client_stream, client_remote) = handshake(client_stream, info_hash, generate_peer_id()).await.unwrap();
        let (server_stream, server_remote) = server.await.unwrap();

        let (client_events_tx, mut client_events_rx) = mpsc::channel(8);
        let client_handle = spawn(client_stream, client_remote, client_events_tx);
        let (server_events_tx, mut server_events_rx) = mpsc::channel(8);
        let _server_handle = spawn(server_stream, server_remote, server_events_tx);

        client_handle
            .commands
            .send(PeerCommand::Send(PeerMessage::Interested))
            .await
            .unwrap();

        let event = server_events_rx.recv().await.unwrap();
        assert!(matches!(event, PeerEvent::Message(PeerMessage::Interested)));

        client_handle.commands.send(PeerCommand::Shutdown).await.unwrap();
        let closed = client_events_rx.recv().await.unwrap();
        assert!(matches!(closed, PeerEvent::Closed { reason: CloseReason::Commanded }));
    }
}
