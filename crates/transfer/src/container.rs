//! Container signature check and entry-name peek.
//!
//! The assembled file is expected to be a ZIP container. Finalization only
//! needs a structural look: verify the leading signature and enumerate
//! top-level entry names. Entry data is skipped, never decompressed or
//! materialized.
//!
//! # Local record layout (little-endian)
//!
//! ```text
//! [4 bytes: signature 50 4B 03 04]
//! [2 version] [2 flags] [2 method] [2 time] [2 date]
//! [4 crc32] [4 compressed size] [4 uncompressed size]
//! [2 name len] [2 extra len]
//! [name] [extra] [compressed data]
//! ```
//!
//! The walk ends at the first non-local signature (normally the central
//! directory). A record using a data descriptor (flag bit 3) defers its
//! sizes, so the data cannot be skipped; the walk records that entry's name
//! and stops.

use std::io::{BufReader, Read};
use std::path::Path;

use tracing::debug;

use crate::TransferError;

/// Local file entry record.
pub const SIG_LOCAL_ENTRY: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

/// End-of-central-directory record of an empty container.
pub const SIG_EMPTY: [u8; 4] = [0x50, 0x4B, 0x05, 0x06];

/// Spanned/split container marker.
pub const SIG_SPANNED: [u8; 4] = [0x50, 0x4B, 0x07, 0x08];

/// Flag bit 3: sizes deferred to a trailing data descriptor.
const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;

/// Verifies that `path` starts with a recognized container signature.
pub fn check_signature(path: &Path) -> Result<(), TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut sig = [0u8; 4];
    if file.read_exact(&mut sig).is_err() {
        return Err(TransferError::InvalidContainer(
            "file too short for a container signature".into(),
        ));
    }

    if sig == SIG_LOCAL_ENTRY || sig == SIG_EMPTY || sig == SIG_SPANNED {
        Ok(())
    } else {
        Err(TransferError::InvalidContainer(format!(
            "unrecognized signature {}",
            hex::encode(sig)
        )))
    }
}

/// Enumerates entry names by walking local records, draining entry data.
///
/// Returns an empty list for an empty container.
pub fn peek_entries(path: &Path) -> Result<Vec<String>, TransferError> {
    let file = std::fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut entries = Vec::new();

    loop {
        let mut sig = [0u8; 4];
        match reader.read_exact(&mut sig) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        if sig != SIG_LOCAL_ENTRY {
            // Central directory or end record: no more local entries.
            break;
        }

        let mut header = [0u8; 26];
        reader.read_exact(&mut header)?;
        let flags = u16::from_le_bytes([header[2], header[3]]);
        let compressed_size =
            u32::from_le_bytes([header[14], header[15], header[16], header[17]]);
        let name_len = u16::from_le_bytes([header[22], header[23]]) as usize;
        let extra_len = u16::from_le_bytes([header[24], header[25]]) as i64;

        let mut name_buf = vec![0u8; name_len];
        reader.read_exact(&mut name_buf)?;
        let name = String::from_utf8_lossy(&name_buf).into_owned();
        entries.push(name);

        if flags & FLAG_DATA_DESCRIPTOR != 0 || compressed_size == u32::MAX {
            // Sizes unknown up front; the data cannot be skipped.
            debug!(entries = entries.len(), "entry walk stopped at deferred-size record");
            break;
        }

        reader.seek_relative(extra_len + i64::from(compressed_size))?;
    }

    Ok(entries)
}
