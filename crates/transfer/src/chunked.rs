use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

use sha2::{Digest, Sha256};

use crate::TransferError;

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-256 of an entire file, streaming with a fixed buffer,
/// and returns the lowercase hex digest.
pub fn hash_file(path: &Path) -> Result<String, TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// One fixed-size chunk of a source file.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Chunk index within the file.
    pub index: u32,
    /// Byte offset (`index * chunk_size`).
    pub offset: u64,
    /// Raw chunk data; shorter than `chunk_size` only for the last chunk.
    pub data: Vec<u8>,
    /// SHA-256 hex checksum of `data`.
    pub checksum: String,
}

/// Index-addressed reader over a source file.
///
/// Chunks can be read in any order and from multiple tasks concurrently;
/// the underlying file handle is seek-positioned under a lock per read.
pub struct ChunkReader {
    file: Mutex<std::fs::File>,
    chunk_size: u64,
    total_size: u64,
    total_chunks: u32,
}

impl ChunkReader {
    /// Opens `path` for chunked reading with the given chunk size.
    pub fn new(path: &Path, chunk_size: u64) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        let total_size = file.metadata()?.len();
        let total_chunks = total_size.div_ceil(chunk_size) as u32;
        Ok(Self {
            file: Mutex::new(file),
            chunk_size,
            total_size,
            total_chunks,
        })
    }

    /// Reads the chunk at `index`.
    pub fn read_chunk(&self, index: u32) -> Result<Chunk, TransferError> {
        if index >= self.total_chunks {
            return Err(TransferError::ChunkOutOfRange {
                index,
                total: self.total_chunks,
            });
        }

        let offset = u64::from(index) * self.chunk_size;
        let len = self.chunk_size.min(self.total_size - offset) as usize;
        let mut data = vec![0u8; len];

        {
            let mut file = self.file.lock().unwrap();
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut data)?;
        }

        let checksum = checksum_bytes(&data);
        Ok(Chunk {
            index,
            offset,
            data,
            checksum,
        })
    }

    /// Total file size in bytes.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Number of chunks (`ceil(total_size / chunk_size)`).
    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    /// Configured chunk size.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }
}
