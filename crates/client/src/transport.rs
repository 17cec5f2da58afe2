//! Transport seam between the scheduler and the wire.
//!
//! The scheduler only needs the three protocol operations; everything about
//! framing, routing, and connection management stays behind this trait.

use std::future::Future;
use std::pin::Pin;

use chunkferry_protocol::{
    FinalizeRequest, FinalizeResponse, InitUploadRequest, InitUploadResponse, UploadChunkRequest,
    UploadChunkResponse,
};

use crate::ClientError;

/// Boxed future returned by transport methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ClientError>> + Send + 'a>>;

/// Abstract connection to an upload server.
///
/// Implemented by the application on top of its actual carrier; tests use
/// in-process mocks. Chunk payloads are passed as raw bytes alongside the
/// request header.
pub trait ChunkTransport: Send + Sync {
    /// Starts or resumes a session.
    fn init(&self, req: &InitUploadRequest) -> TransportFuture<'_, InitUploadResponse>;

    /// Sends one chunk payload.
    fn upload_chunk(
        &self,
        req: &UploadChunkRequest,
        data: &[u8],
    ) -> TransportFuture<'_, UploadChunkResponse>;

    /// Requests terminal verification and commit.
    fn finalize(&self, req: &FinalizeRequest) -> TransportFuture<'_, FinalizeResponse>;
}
