//! The download scheduler: rarest-first piece/block selection, request
//! pipelining, and the choke/interest-driven state machine that decides when
//! requests may be sent at all.

use thiserror::Error;

pub mod download;
pub mod picker;

pub use download::{DownloadScheduler, BLOCK_SIZE, PIPELINE_DEPTH};
pub use picker::{count_availability, select_block, select_piece};

/// Errors surfaced by the scheduler's own bookkeeping. Piece-verification
/// failure is deliberately absent here: per spec it's a silent, recoverable
/// reset handled inside [`crate::domain::storage::Storage`], not a failure
/// the scheduler reports.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("no peer session registered for peer id {0:02x?}")]
    UnknownPeer([u8; 20]),
}
