//! Positional chunk writes into a session's destination file.
//!
//! Correctness under concurrency rests on disjoint byte ranges: each chunk
//! index owns exactly the range `[index * chunk_size, index * chunk_size +
//! len)`, and claim serialization upstream guarantees a single writer per
//! index. No file lock is taken here.

use std::io::SeekFrom;
use std::path::Path;

use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use crate::TransferError;

/// Creates an empty file at `path` if absent.
///
/// Never truncates: a partially assembled file keeps the ranges already
/// written.
pub async fn ensure_destination(path: &Path) -> Result<(), TransferError> {
    match OpenOptions::new().write(true).create_new(true).open(path).await {
        Ok(_) => {
            debug!(path = %path.display(), "destination file created");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Writes `data` at `offset`, overwriting that range and leaving all other
/// ranges untouched. The write either completes fully or fails.
pub async fn write_at(path: &Path, data: &[u8], offset: u64) -> Result<(), TransferError> {
    let mut file = OpenOptions::new().write(true).open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    file.write_all(data).await?;
    file.flush().await?;
    Ok(())
}
