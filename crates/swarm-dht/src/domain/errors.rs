//! Domain-level error types.
//!
//! Bucket-full-with-live-head and piece-verification failure are not
//! represented here: both are designed, silent outcomes (see
//! [`crate::domain::kbucket::Admission`] and
//! [`crate::domain::storage::Storage::verify_and_commit`]), not failures.

use thiserror::Error;

/// Errors surfaced by [`crate::domain::routing_table::RoutingTable`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("cannot insert local node id into its own routing table")]
    SelfInsertion,
}

/// Errors surfaced by [`crate::domain::storage::Storage`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("piece {0} has not been initialized for download")]
    PieceNotInitialized(usize),
    #[error("piece {0} index out of range (have {1} pieces)")]
    PieceIndexOutOfRange(usize, usize),
    #[error("piece {0} is not yet complete")]
    PieceNotComplete(usize),
    #[error("block index {block} out of range for piece {piece} ({len} blocks)")]
    BlockIndexOutOfRange {
        piece: usize,
        block: usize,
        len: usize,
    },
}
