use serde::{Deserialize, Serialize};

use crate::InvalidRequest;

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Starts (or resumes) an upload session.
///
/// Idempotent per `(filename, total_size)`: repeated calls return the same
/// session rather than creating a duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadRequest {
    pub filename: String,
    pub total_size: u64,
    pub total_chunks: u32,
}

impl InitUploadRequest {
    /// Rejects payloads with missing or non-positive required fields.
    pub fn validate(&self) -> Result<(), InvalidRequest> {
        if self.filename.is_empty() {
            return Err(InvalidRequest("filename is required".into()));
        }
        if self.total_size == 0 {
            return Err(InvalidRequest("totalSize must be positive".into()));
        }
        if self.total_chunks == 0 {
            return Err(InvalidRequest("totalChunks must be positive".into()));
        }
        Ok(())
    }
}

/// Header for one chunk payload.
///
/// The chunk bytes themselves travel out-of-band next to this header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkRequest {
    pub upload_id: String,
    pub chunk_index: u32,
    /// SHA-256 hex checksum of the payload; empty disables verification.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
}

impl UploadChunkRequest {
    pub fn validate(&self) -> Result<(), InvalidRequest> {
        if self.upload_id.is_empty() {
            return Err(InvalidRequest("uploadId is required".into()));
        }
        Ok(())
    }
}

/// Requests terminal verification and commit of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    pub upload_id: String,
}

impl FinalizeRequest {
    pub fn validate(&self) -> Result<(), InvalidRequest> {
        if self.upload_id.is_empty() {
            return Err(InvalidRequest("uploadId is required".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Response to [`InitUploadRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadResponse {
    pub upload_id: String,
    /// Chunk indices the server already holds, for resume.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uploaded_chunks: Vec<u32>,
}

/// Acknowledgement for one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkResponse {
    /// `true` when the chunk was already claimed before this request.
    /// Both values are success from the caller's point of view.
    #[serde(default)]
    pub already_received: bool,
}

/// Response to [`FinalizeRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    /// Lowercase hex SHA-256 of the assembled file.
    pub hash: String,
    /// Top-level entry names found in the container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<String>,
}
