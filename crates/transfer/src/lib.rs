//! Chunk-level file I/O for resumable uploads.
//!
//! The client side reads a source file as fixed-size, index-addressed
//! chunks ([`ChunkReader`]); the server side assembles them by writing at
//! `index * chunk_size` offsets ([`store`]). Finalization support lives in
//! [`hash_file`] (streaming SHA-256) and [`container`] (signature check and
//! entry peek). [`SpeedCalculator`] provides the trailing-window transfer
//! rate used for progress estimation.

mod chunked;
pub mod container;
mod progress;
pub mod store;

pub use chunked::{Chunk, ChunkReader, checksum_bytes, hash_file};
pub use progress::SpeedCalculator;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("chunk index {index} out of range (total {total})")]
    ChunkOutOfRange { index: u32, total: u32 },

    #[error("invalid container: {0}")]
    InvalidContainer(String),
}
