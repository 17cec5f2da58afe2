//! Client side of the Chunkferry upload protocol.
//!
//! [`UploadScheduler`] drives a bounded pool of concurrent chunk transfers
//! over a [`ChunkTransport`], with per-chunk retry/backoff, pause/resume,
//! and trailing-window progress estimation. The transport trait keeps
//! scheduling logic decoupled from the actual wire and testable with mocks.

mod scheduler;
mod transport;

pub use scheduler::{SchedulerConfig, UploadScheduler};
pub use transport::{ChunkTransport, TransportFuture};

use chunkferry_transfer::TransferError;

/// Errors produced by the upload client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("server rejected request: {0}")]
    Rejected(String),

    #[error("upload session not initialized")]
    NotInitialized,

    #[error("upload incomplete: {uploaded} of {total} chunks confirmed")]
    Incomplete { uploaded: u32, total: u32 },

    #[error("blocking task failed: {0}")]
    TaskJoin(String),
}
