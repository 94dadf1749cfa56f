//! The download scheduler: owns per-peer choke/interest state, drives
//! rarest-first piece/block selection, pipelines block requests, and
//! broadcasts `have` once a piece verifies.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;

use crate::domain::{Bitfield, PeerConnectionState, Storage};
use crate::manifest::Manifest;
use crate::wire::connection::BLOCK_TIMEOUT;
use crate::wire::{PeerCommand, PeerEvent, PeerHandle, PeerMessage};

use super::picker::{count_availability, select_block, select_piece};

/// Default 16 KiB block size used throughout the peer-wire protocol.
pub const BLOCK_SIZE: u32 = 16384;
/// Maximum outstanding block requests per peer connection at once.
pub const PIPELINE_DEPTH: usize = 5;

struct PeerSession {
    handle: PeerHandle,
    state: PeerConnectionState,
}

/// Coordinates every live peer connection for one torrent download.
///
/// Holds no back-reference to the node that owns it; it is driven purely by
/// inbound [`PeerEvent`]s (via `poll_events`) and by [`DownloadScheduler::tick`],
/// which the embedder calls periodically (e.g. once a second).
pub struct DownloadScheduler {
    manifest: Manifest,
    storage: Arc<Mutex<Storage>>,
    peers: HashMap<[u8; 20], PeerSession>,
    events: mpsc::Receiver<([u8; 20], PeerEvent)>,
    events_tx: mpsc::Sender<([u8; 20], PeerEvent)>,
    rng: StdRng,
}

impl DownloadScheduler {
    pub fn new(manifest: Manifest, storage: Arc<Mutex<Storage>>) -> Self {
        let (events_tx, events) = mpsc::channel(256);
        Self {
            manifest,
            storage,
            peers: HashMap::new(),
            events,
            events_tx,
            rng: StdRng::from_entropy(),
        }
    }

    /// Register a freshly handshaked, spawned connection. Immediately sends
    /// our bitfield, per the conventional post-handshake exchange.
    pub async fn add_peer(&mut self, handle: PeerHandle, raw_events: mpsc::Receiver<PeerEvent>) {
        let peer_id = handle.remote_peer_id;
        let local_bits = self.storage.lock().bitfield().to_bytes();
        let _ = handle.commands.send(PeerCommand::Send(PeerMessage::Bitfield { bits: local_bits })).await;

        self.peers.insert(
            peer_id,
            PeerSession {
                handle,
                state: PeerConnectionState::new(self.manifest.num_pieces()),
            },
        );
        relay_events(peer_id, raw_events, self.events_tx.clone());
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Rolling `(download_rate, upload_rate)` for one connected peer, for an
    /// embedder's monitoring/logging to poll.
    pub fn peer_rates(&self, peer_id: [u8; 20]) -> Result<(f64, f64), super::SchedulerError> {
        self.peers
            .get(&peer_id)
            .map(|session| (session.state.download_rate(), session.state.upload_rate()))
            .ok_or(super::SchedulerError::UnknownPeer(peer_id))
    }

    /// Drain and apply every event currently queued from peer connections.
    /// Returns the set of peer ids that were removed this round (closed).
    pub async fn drain_events(&mut self) -> Vec<[u8; 20]> {
        let mut closed = Vec::new();
        while let Ok((peer_id, event)) = self.events.try_recv() {
            if self.apply_event(peer_id, event).await {
                closed.push(peer_id);
            }
        }
        closed
    }

    async fn apply_event(&mut self, peer_id: [u8; 20], event: PeerEvent) -> bool {
        let Some(session) = self.peers.get_mut(&peer_id) else {
            return false;
        };
        match event {
            PeerEvent::Closed { .. } => {
                self.peers.remove(&peer_id);
                return true;
            }
            PeerEvent::Message(PeerMessage::KeepAlive) => {}
            PeerEvent::Message(PeerMessage::Choke) => session.state.peer_choking = true,
            PeerEvent::Message(PeerMessage::Unchoke) => session.state.peer_choking = false,
            PeerEvent::Message(PeerMessage::Interested) => session.state.peer_interested = true,
            PeerEvent::Message(PeerMessage::NotInterested) => session.state.peer_interested = false,
            PeerEvent::Message(PeerMessage::Bitfield { bits }) => {
                let local = self.storage.lock().bitfield().clone();
                let became_interested = session.state.on_bitfield(&bits, self.manifest.num_pieces(), &local);
                if became_interested && !session.state.am_interested {
                    session.state.am_interested = true;
                    let _ = session.handle.commands.send(PeerCommand::Send(PeerMessage::Interested)).await;
                }
            }
            PeerEvent::Message(PeerMessage::Have { piece_index }) => {
                let local = self.storage.lock().bitfield().clone();
                let became_interested = session.state.on_have(piece_index as usize, &local);
                if became_interested && !session.state.am_interested {
                    session.state.am_interested = true;
                    let _ = session.handle.commands.send(PeerCommand::Send(PeerMessage::Interested)).await;
                }
            }
            PeerEvent::Message(PeerMessage::Request { index, begin, length }) => {
                // Serving uploads means reading verified piece bytes back off
                // disk; this crate's `Storage` only tracks in-flight download
                // state, not a persisted completed-piece cache, so there is
                // nothing to serve from here yet. An embedder that persists
                // pieces to disk would intercept this event to answer reads.
                tracing::trace!(piece = index, begin, length, choking = session.state.am_choking, "ignoring upload request: no piece cache wired");
            }
            PeerEvent::Message(PeerMessage::Piece { index, begin, block }) => {
                let block_index = (begin / BLOCK_SIZE) as usize;
                if session.state.record_received((index, begin)) {
                    let mut storage = self.storage.lock();
                    let _ = storage.mark_block_received(index as usize, block_index, block);
                    if storage.is_piece_complete(index as usize).unwrap_or(false) {
                        if let Ok(true) = storage.verify_and_commit(index as usize) {
                            drop(storage);
                            self.broadcast_have(index).await;
                        }
                    }
                }
            }
            PeerEvent::Message(PeerMessage::Cancel { .. }) => {}
        }
        false
    }

    async fn broadcast_have(&mut self, piece_index: u32) {
        let local = self.storage.lock().bitfield().clone();
        for session in self.peers.values_mut() {
            let _ = session.handle.commands.send(PeerCommand::Send(PeerMessage::Have { piece_index })).await;

            if session.state.am_interested && !session.state.reveals_wanted_piece(&local) {
                session.state.am_interested = false;
                let _ = session.handle.commands.send(PeerCommand::Send(PeerMessage::NotInterested)).await;
            }
        }
    }

    /// One scheduling pass: sweep timed-out requests back to absent, then
    /// top up each unchoked, interested peer's in-flight pipeline up to
    /// [`PIPELINE_DEPTH`] using rarest-first selection.
    pub async fn tick(&mut self) {
        self.sweep_timeouts();
        self.fill_pipelines().await;
    }

    fn sweep_timeouts(&mut self) {
        let mut storage = self.storage.lock();
        for session in self.peers.values_mut() {
            for (piece, block_begin) in session.state.sweep_timed_out(BLOCK_TIMEOUT) {
                let block_index = (block_begin / BLOCK_SIZE) as usize;
                let _ = storage.mark_block_absent(piece as usize, block_index);
            }
        }
    }

    async fn fill_pipelines(&mut self) {
        let num_pieces = self.manifest.num_pieces();
        let remote_bitfields: Vec<Bitfield> = self.peers.values().map(|s| s.state.remote_bitfield().clone()).collect();
        let refs: Vec<&Bitfield> = remote_bitfields.iter().collect();
        let availability = count_availability(num_pieces, &refs);

        for session in self.peers.values_mut() {
            if !session.state.can_request() {
                continue;
            }
            let remote = session.state.remote_bitfield().clone();
            while session.state.pending_count() < PIPELINE_DEPTH {
                let storage = self.storage.lock();
                let Some(piece_index) = select_piece(&storage, &remote, &availability, &mut self.rng) else {
                    break;
                };
                let num_blocks = self.manifest.num_blocks_for(piece_index, BLOCK_SIZE);
                if storage.block_status(piece_index, 0).is_none() {
                    drop(storage);
                    let _ = self.storage.lock().initialize_piece(piece_index, num_blocks);
                } else {
                    drop(storage);
                }
                let storage = self.storage.lock();
                let Some(block_index) = select_block(&storage, piece_index, num_blocks) else {
                    break;
                };
                let length = if block_index as u32 == num_blocks as u32 - 1 {
                    self.manifest.piece_len_for(piece_index) - block_index as u32 * BLOCK_SIZE
                } else {
                    BLOCK_SIZE
                };
                drop(storage);

                let begin = block_index as u32 * BLOCK_SIZE;
                let mut storage = self.storage.lock();
                let _ = storage.mark_block_requested(piece_index, block_index);
                drop(storage);
                session.state.record_request((piece_index as u32, begin));
                let _ = session
                    .handle
                    .commands
                    .send(PeerCommand::Send(PeerMessage::Request { index: piece_index as u32, begin, length }))
                    .await;
            }
        }
    }
}

/// Bridge a connection's raw event stream into the scheduler's tagged
/// channel, so the scheduler can demultiplex events from many peers off one
/// receiver without polling each connection individually.
fn relay_events(peer_id: [u8; 20], mut raw_events: mpsc::Receiver<PeerEvent>, tagged: mpsc::Sender<([u8; 20], PeerEvent)>) {
    tokio::spawn(async move {
        while let Some(event) = raw_events.recv().await {
            let is_closed = matches!(event, PeerEvent::Closed { .. });
            if tagged.send((peer_id, event)).await.is_err() || is_closed {
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Storage;

    fn fake_peer_handle(peer_id: [u8; 20]) -> (PeerHandle, mpsc::Receiver<PeerCommand>) {
        let (tx, rx) = mpsc::channel(32);
        let handle = PeerHandle {
            remote_peer_id: peer_id,
            commands: tx,
            task: tokio::spawn(async {}),
        };
        (handle, rx)
    }

    #[tokio::test]
    async fn adding_a_peer_sends_our_bitfield_first() {
        let manifest = crate::manifest::Manifest::new([1; 20], BLOCK_SIZE, vec![[0; 20]; 2], BLOCK_SIZE as u64 * 2);
        let storage = Arc::new(Mutex::new(Storage::new(BLOCK_SIZE, manifest.piece_hashes.clone())));
        let mut scheduler = DownloadScheduler::new(manifest, storage);

        let (handle, mut commands_rx) = fake_peer_handle([9; 20]);
        let (_events_tx, events_rx) = mpsc::channel(8);
        scheduler.add_peer(handle, events_rx).await;

        let sent = commands_rx.recv().await.unwrap();
        assert!(matches!(sent, PeerCommand::Send(PeerMessage::Bitfield { .. })));
        assert_eq!(scheduler.peer_count(), 1);
        assert_eq!(scheduler.peer_rates([9; 20]).unwrap(), (0.0, 0.0));
        assert!(matches!(
            scheduler.peer_rates([0xFF; 20]),
            Err(super::super::SchedulerError::UnknownPeer(id)) if id == [0xFF; 20]
        ));
    }

    #[tokio::test]
    async fn receiving_a_wanted_piece_bitfield_triggers_interest() {
        let manifest = crate::manifest::Manifest::new([1; 20], BLOCK_SIZE, vec![[0; 20]; 2], BLOCK_SIZE as u64 * 2);
        let storage = Arc::new(Mutex::new(Storage::new(BLOCK_SIZE, manifest.piece_hashes.clone())));
        let mut scheduler = DownloadScheduler::new(manifest, storage);

        let peer_id = [9; 20];
        let (handle, mut commands_rx) = fake_peer_handle(peer_id);
        let (events_tx, events_rx) = mpsc::channel(8);
        scheduler.add_peer(handle, events_rx).await;
        let _ = commands_rx.recv().await; // our outbound bitfield

        let mut remote_bits = Bitfield::new(2);
        remote_bits.set(0);
        events_tx
            .send((peer_id, PeerEvent::Message(PeerMessage::Bitfield { bits: remote_bits.to_bytes() })))
            .await
            .unwrap();

        let closed = scheduler.drain_events().await;
        assert!(closed.is_empty());

        let sent = commands_rx.recv().await.unwrap();
        assert!(matches!(sent, PeerCommand::Send(PeerMessage::Interested)));
    }

    #[tokio::test]
    async fn losing_interest_after_a_piece_commits_sends_not_interested() {
        let manifest = crate::manifest::Manifest::new([1; 20], BLOCK_SIZE, vec![[0; 20]; 2], BLOCK_SIZE as u64 * 2);
        let storage = Arc::new(Mutex::new(Storage::new(BLOCK_SIZE, manifest.piece_hashes.clone())));
        let mut scheduler = DownloadScheduler::new(manifest, storage);

        let peer_id = [9; 20];
        let (handle, mut commands_rx) = fake_peer_handle(peer_id);
        let (_events_tx, events_rx) = mpsc::channel(8);
        scheduler.add_peer(handle, events_rx).await;
        let _ = commands_rx.recv().await; // our outbound bitfield

        // The peer's (never updated) remote bitfield reveals nothing, so once
        // we simulate prior interest it must lapse back to false on the next
        // broadcast_have, with a NotInterested sent to match.
        let session = scheduler.peers.get_mut(&peer_id).unwrap();
        session.state.am_interested = true;

        scheduler.broadcast_have(0).await;

        let have_sent = commands_rx.recv().await.unwrap();
        assert!(matches!(have_sent, PeerCommand::Send(PeerMessage::Have { piece_index: 0 })));

        let session = scheduler.peers.get(&peer_id).unwrap();
        assert!(!session.state.am_interested);
        let not_interested_sent = commands_rx.recv().await.unwrap();
        assert!(matches!(not_interested_sent, PeerCommand::Send(PeerMessage::NotInterested)));
    }
}
