//! Upload session service: init, chunk receipt, finalization.
//!
//! Chunk receipt takes no file lock: the ledger's claim step already
//! guarantees a single writer per `(session, index)`, and distinct
//! indices write disjoint byte ranges. Finalization is the only operation
//! that takes a session-scoped lock, held from the completeness check
//! through the commit so exactly one concurrent finalize can win.

use std::path::PathBuf;
use std::sync::Arc;

use chunkferry_protocol::{
    FinalizeResponse, InitUploadRequest, InitUploadResponse, SessionStatus,
};
use chunkferry_transfer::{TransferError, checksum_bytes, container, hash_file, store};
use tracing::{debug, info, warn};

use crate::ServiceError;
use crate::ledger::{ClaimOutcome, Ledger};

/// Result of accepting one chunk. Both variants are success to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Claimed, written, and marked received by this call.
    Written,
    /// An earlier call owns the index; nothing was written.
    AlreadyReceived,
}

/// Server-side orchestrator for resumable chunked uploads.
pub struct UploadService {
    ledger: Arc<dyn Ledger>,
    upload_dir: PathBuf,
    chunk_size: u64,
}

impl UploadService {
    /// Creates a service assembling files under `upload_dir`.
    ///
    /// `chunk_size` must match the client's; reassembly offsets are
    /// `chunk_index * chunk_size`.
    pub fn new(ledger: Arc<dyn Ledger>, upload_dir: impl Into<PathBuf>, chunk_size: u64) -> Self {
        Self {
            ledger,
            upload_dir: upload_dir.into(),
            chunk_size,
        }
    }

    /// Destination file for a session.
    ///
    /// Keyed by the server-generated session id, never by client input.
    pub fn destination_path(&self, session_id: &str) -> PathBuf {
        self.upload_dir.join(session_id)
    }

    /// Starts or resumes a session; returns the already-received indices.
    pub async fn init(&self, req: &InitUploadRequest) -> Result<InitUploadResponse, ServiceError> {
        req.validate()?;

        let (session, uploaded_chunks) = self
            .ledger
            .find_or_create_session(&req.filename, req.total_size, req.total_chunks)
            .await?;

        info!(
            session = %session.id,
            filename = %req.filename,
            received = uploaded_chunks.len(),
            total = session.total_chunks,
            "upload initialized"
        );
        Ok(InitUploadResponse {
            upload_id: session.id,
            uploaded_chunks,
        })
    }

    /// Accepts one chunk payload.
    ///
    /// Claim → ensure destination → positional write → mark received. A
    /// conflicting claim returns [`ChunkOutcome::AlreadyReceived`]
    /// immediately: the chunk is either mid-flight or already durable, and
    /// the caller cannot tell the difference, so succeeding silently is the
    /// correct idempotent answer. A failure after the claim leaves the
    /// chunk in `Receiving` forever — that index can never be re-claimed.
    pub async fn upload_chunk(
        &self,
        upload_id: &str,
        chunk_index: u32,
        data: &[u8],
        checksum: &str,
    ) -> Result<ChunkOutcome, ServiceError> {
        let session = self.ledger.get_session(upload_id).await?;

        if chunk_index >= session.total_chunks {
            return Err(TransferError::ChunkOutOfRange {
                index: chunk_index,
                total: session.total_chunks,
            }
            .into());
        }

        // Verify before claiming so a corrupt payload can be re-sent.
        if !checksum.is_empty() && checksum_bytes(data) != checksum {
            return Err(TransferError::ChecksumMismatch.into());
        }

        match self.ledger.claim_chunk(upload_id, chunk_index).await? {
            ClaimOutcome::AlreadyClaimed => {
                debug!(session = %upload_id, chunk = chunk_index, "chunk already claimed");
                return Ok(ChunkOutcome::AlreadyReceived);
            }
            ClaimOutcome::Claimed => {}
        }

        let path = self.destination_path(&session.id);
        let offset = u64::from(chunk_index) * self.chunk_size;
        let written = async {
            store::ensure_destination(&path).await?;
            store::write_at(&path, data, offset).await
        }
        .await;

        if let Err(e) = written {
            warn!(
                session = %upload_id,
                chunk = chunk_index,
                error = %e,
                "chunk write failed; index remains claimed"
            );
            return Err(e.into());
        }

        self.ledger.mark_received(upload_id, chunk_index).await?;
        debug!(
            session = %upload_id,
            chunk = chunk_index,
            bytes = data.len(),
            "chunk received"
        );
        Ok(ChunkOutcome::Written)
    }

    /// Verifies completeness, hashes, validates the container, and commits.
    ///
    /// Idempotent once completed: repeat calls return the stored hash and
    /// an empty entry list. Any failure leaves the session `Uploading` and
    /// resumable.
    pub async fn finalize(&self, upload_id: &str) -> Result<FinalizeResponse, ServiceError> {
        // Serializes concurrent finalize calls for this session only.
        let _guard = self.ledger.lock_session(upload_id).await?;

        let session = self.ledger.get_session(upload_id).await?;
        if session.status == SessionStatus::Completed {
            info!(session = %upload_id, "finalize on already-completed session");
            return Ok(FinalizeResponse {
                hash: session.final_hash.unwrap_or_default(),
                entries: Vec::new(),
            });
        }

        let received = self.ledger.count_received(upload_id).await?;
        if received != session.total_chunks {
            return Err(ServiceError::NotAllChunksUploaded {
                received,
                total: session.total_chunks,
            });
        }

        let path = self.destination_path(&session.id);

        // The hash covers the whole byte stream regardless of validity, so
        // it is computed before the container check.
        let hash = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || hash_file(&path))
                .await
                .map_err(|e| ServiceError::TaskJoin(e.to_string()))??
        };

        let entries = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || {
                container::check_signature(&path)?;
                container::peek_entries(&path)
            })
            .await
            .map_err(|e| ServiceError::TaskJoin(e.to_string()))??
        };

        self.ledger.commit_completed(upload_id, &hash).await?;
        info!(
            session = %upload_id,
            hash = %hash,
            entries = entries.len(),
            "upload finalized"
        );
        Ok(FinalizeResponse { hash, entries })
    }
}
