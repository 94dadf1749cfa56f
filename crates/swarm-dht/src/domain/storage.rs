//! Piece storage: bitfield, per-piece block tracking, SHA-1 verification.

use sha1::{Digest, Sha1};
use std::collections::HashMap;

use super::errors::StorageError;

/// Status of a single block within a piece being actively downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Absent,
    Requested,
    Received,
}

struct PendingPiece {
    status: Vec<BlockStatus>,
    bytes: Vec<Option<Vec<u8>>>,
}

impl PendingPiece {
    fn new(num_blocks: usize) -> Self {
        Self {
            status: vec![BlockStatus::Absent; num_blocks],
            bytes: vec![None; num_blocks],
        }
    }
}

/// Packed bit vector: bit `i` set iff piece `i` is complete and verified.
#[derive(Debug, Clone, Default)]
pub struct Bitfield {
    bits: Vec<bool>,
}

impl Bitfield {
    pub fn new(num_pieces: usize) -> Self {
        Self {
            bits: vec![false; num_pieces],
        }
    }

    pub fn get(&self, index: usize) -> bool {
        self.bits.get(index).copied().unwrap_or(false)
    }

    pub fn set(&mut self, index: usize) {
        if let Some(bit) = self.bits.get_mut(index) {
            *bit = true;
        }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Pack into the BitTorrent wire `bitfield` payload (MSB-first per byte).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.bits.len().div_ceil(8)];
        for (i, set) in self.bits.iter().enumerate() {
            if *set {
                out[i / 8] |= 0x80 >> (i % 8);
            }
        }
        out
    }

    pub fn from_bytes(bytes: &[u8], num_pieces: usize) -> Self {
        let mut bits = vec![false; num_pieces];
        for (i, bit) in bits.iter_mut().enumerate() {
            let byte = bytes.get(i / 8).copied().unwrap_or(0);
            *bit = byte & (0x80 >> (i % 8)) != 0;
        }
        Self { bits }
    }
}

/// Owns the manifest's piece digests, the locally-verified bitfield, and the
/// in-progress block status of pieces currently being downloaded.
///
/// Invariant: `my_bitfield[i]` set implies all blocks of piece `i` were
/// received and the SHA-1 of their concatenation equals `piece_hashes[i]`.
pub struct Storage {
    piece_length: u32,
    piece_hashes: Vec<[u8; 20]>,
    my_bitfield: Bitfield,
    pending: HashMap<usize, PendingPiece>,
}

impl Storage {
    pub fn new(piece_length: u32, piece_hashes: Vec<[u8; 20]>) -> Self {
        let num_pieces = piece_hashes.len();
        Self {
            piece_length,
            piece_hashes,
            my_bitfield: Bitfield::new(num_pieces),
            pending: HashMap::new(),
        }
    }

    pub fn num_pieces(&self) -> usize {
        self.piece_hashes.len()
    }

    pub fn piece_length(&self) -> u32 {
        self.piece_length
    }

    pub fn bitfield(&self) -> &Bitfield {
        &self.my_bitfield
    }

    pub fn has_piece(&self, index: usize) -> bool {
        self.my_bitfield.get(index)
    }

    fn check_index(&self, index: usize) -> Result<(), StorageError> {
        if index >= self.piece_hashes.len() {
            return Err(StorageError::PieceIndexOutOfRange(index, self.piece_hashes.len()));
        }
        Ok(())
    }

    /// Allocate a block-status vector of `num_blocks` entries, all absent.
    pub fn initialize_piece(&mut self, index: usize, num_blocks: usize) -> Result<(), StorageError> {
        self.check_index(index)?;
        self.pending.insert(index, PendingPiece::new(num_blocks));
        Ok(())
    }

    pub fn mark_block_requested(&mut self, index: usize, block: usize) -> Result<(), StorageError> {
        let piece = self
            .pending
            .get_mut(&index)
            .ok_or(StorageError::PieceNotInitialized(index))?;
        let len = piece.status.len();
        let status = piece
            .status
            .get_mut(block)
            .ok_or(StorageError::BlockIndexOutOfRange { piece: index, block, len })?;
        *status = BlockStatus::Requested;
        Ok(())
    }

    /// Set a block's status to absent again (lost request timeout, or a
    /// verification failure resetting the whole piece).
    pub fn mark_block_absent(&mut self, index: usize, block: usize) -> Result<(), StorageError> {
        let piece = self
            .pending
            .get_mut(&index)
            .ok_or(StorageError::PieceNotInitialized(index))?;
        let len = piece.status.len();
        let status = piece
            .status
            .get_mut(block)
            .ok_or(StorageError::BlockIndexOutOfRange { piece: index, block, len })?;
        *status = BlockStatus::Absent;
        piece.bytes[block] = None;
        Ok(())
    }

    /// Record a received block's bytes.
    pub fn mark_block_received(&mut self, index: usize, block: usize, bytes: Vec<u8>) -> Result<(), StorageError> {
        let piece = self
            .pending
            .get_mut(&index)
            .ok_or(StorageError::PieceNotInitialized(index))?;
        let len = piece.status.len();
        let status = piece
            .status
            .get_mut(block)
            .ok_or(StorageError::BlockIndexOutOfRange { piece: index, block, len })?;
        *status = BlockStatus::Received;
        piece.bytes[block] = Some(bytes);
        Ok(())
    }

    pub fn block_status(&self, index: usize, block: usize) -> Option<BlockStatus> {
        self.pending.get(&index).and_then(|p| p.status.get(block).copied())
    }

    pub fn is_piece_complete(&self, index: usize) -> Result<bool, StorageError> {
        let piece = self
            .pending
            .get(&index)
            .ok_or(StorageError::PieceNotInitialized(index))?;
        Ok(piece.status.iter().all(|s| *s == BlockStatus::Received))
    }

    /// Concatenate blocks, hash with SHA-1, and compare to the manifest
    /// digest. On match, sets the bitfield bit and frees staging. On
    /// mismatch, silently resets the piece to all-absent and drops staged
    /// bytes — a recoverable condition, not an `Err`; the caller decides
    /// whether to penalize contributing peers.
    pub fn verify_and_commit(&mut self, index: usize) -> Result<bool, StorageError> {
        self.check_index(index)?;
        if !self.is_piece_complete(index)? {
            return Err(StorageError::PieceNotComplete(index));
        }

        let piece = self.pending.get(&index).expect("checked complete above");
        let mut hasher = Sha1::new();
        for block in &piece.bytes {
            hasher.update(block.as_ref().expect("received block has bytes"));
        }
        let digest: [u8; 20] = hasher.finalize().into();

        if digest == self.piece_hashes[index] {
            self.my_bitfield.set(index);
            self.pending.remove(&index);
            Ok(true)
        } else {
            let piece = self.pending.get_mut(&index).expect("checked complete above");
            for status in &mut piece.status {
                *status = BlockStatus::Absent;
            }
            for bytes in &mut piece.bytes {
                *bytes = None;
            }
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sha1_of(data: &[u8]) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(data);
        hasher.finalize().into()
    }

    /// S5 — Piece verification, success path.
    #[test]
    fn verified_piece_sets_bitfield() {
        let payload = vec![0x42u8; 16384];
        let digest = sha1_of(&payload);
        let mut storage = Storage::new(16384, vec![digest]);

        storage.initialize_piece(0, 1).unwrap();
        storage.mark_block_received(0, 0, payload).unwrap();
        assert!(storage.is_piece_complete(0).unwrap());

        let ok = storage.verify_and_commit(0).unwrap();
        assert!(ok);
        assert!(storage.has_piece(0));
    }

    /// S5 — Piece verification, mismatch path.
    #[test]
    fn corrupted_piece_resets_and_leaves_bit_clear() {
        let mut payload = vec![0x42u8; 16384];
        let digest = sha1_of(&payload);
        payload[0] ^= 0xFF; // flip a byte so it no longer matches
        let mut storage = Storage::new(16384, vec![digest]);

        storage.initialize_piece(0, 1).unwrap();
        storage.mark_block_received(0, 0, payload).unwrap();

        let ok = storage.verify_and_commit(0).unwrap();
        assert!(!ok);
        assert!(!storage.has_piece(0));
        assert_eq!(storage.block_status(0, 0), Some(BlockStatus::Absent));
    }

    #[test]
    fn bitfield_round_trips_through_wire_bytes() {
        let mut bf = Bitfield::new(10);
        bf.set(0);
        bf.set(9);
        let bytes = bf.to_bytes();
        let back = Bitfield::from_bytes(&bytes, 10);
        assert!(back.get(0));
        assert!(back.get(9));
        assert!(!back.get(5));
    }
}
