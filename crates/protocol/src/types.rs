use serde::{Deserialize, Serialize};

/// Server-side state of an upload session.
///
/// Monotonic: once `Completed`, a session never reverts to `Uploading`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Uploading,
    Completed,
}

/// Client-side state of a single chunk index.
///
/// `Error` means the last scheduling attempt exhausted its retries; the
/// index is re-queued, not abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkState {
    Pending,
    Uploading,
    Success,
    Error,
}

/// A snapshot of upload progress, suitable for rendering a status view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub upload_id: String,
    /// Confirmed chunks / total chunks, in `[0.0, 1.0]`.
    pub fraction: f64,
    /// Trailing-window transfer rate.
    pub bytes_per_second: f64,
    /// Estimated seconds remaining; `None` when the rate is zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<f64>,
    pub uploaded_chunks: u32,
    pub total_chunks: u32,
}
