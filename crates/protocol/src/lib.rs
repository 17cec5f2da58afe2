//! Wire protocol types for the Chunkferry upload API.
//!
//! Requests and responses are plain serde structs; any carrier that moves
//! them between client and server (HTTP, WebSocket, in-process) preserves
//! the protocol. Chunk payloads travel out-of-band as raw bytes next to
//! their [`UploadChunkRequest`] header.

mod messages;
mod types;

pub use messages::{
    FinalizeRequest, FinalizeResponse, InitUploadRequest, InitUploadResponse, UploadChunkRequest,
    UploadChunkResponse,
};
pub use types::{ChunkState, SessionStatus, UploadProgress};

/// Fixed chunk size: 5 MiB.
///
/// Client and server must agree on this value: reassembly offsets are
/// computed as `chunk_index * CHUNK_SIZE` and the protocol does not
/// negotiate a per-session size.
pub const CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Error for a malformed or incomplete request payload.
///
/// Surfaced immediately to the caller; never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid request: {0}")]
pub struct InvalidRequest(pub String);
