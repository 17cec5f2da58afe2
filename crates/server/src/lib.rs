//! Server side of the Chunkferry upload protocol.
//!
//! [`ledger::Ledger`] is the durable record of sessions and per-chunk
//! receipt state, with atomic claim semantics. [`service::UploadService`]
//! orchestrates init/chunk/finalize on top of the ledger and the chunk
//! store, and owns the finalization state machine.

pub mod ledger;
pub mod service;

pub use ledger::{ClaimOutcome, Ledger, LedgerError, MemoryLedger, ReceiptState, SessionRecord};
pub use service::{ChunkOutcome, UploadService};

use chunkferry_protocol::InvalidRequest;
use chunkferry_transfer::TransferError;

/// Errors produced by the upload service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Invalid(#[from] InvalidRequest),

    #[error("upload not found: {0}")]
    SessionNotFound(String),

    #[error("not all chunks uploaded: {received} of {total}")]
    NotAllChunksUploaded { received: u32, total: u32 },

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("blocking task failed: {0}")]
    TaskJoin(String),
}

impl From<LedgerError> for ServiceError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::SessionNotFound(id) => ServiceError::SessionNotFound(id),
        }
    }
}
