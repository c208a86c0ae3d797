// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! LZ4 block compression for snapshot payloads.
//!
//! Snapshots are stored as a single LZ4 block with a prepended size header.
//! A payload that fails to decode as LZ4 is treated as raw bytes, so uploads
//! that fell back to uncompressed data restore unchanged.

use tracing::warn;

/// Compress a whole-file payload into a single LZ4 block.
///
/// Never fails: block compression on an in-memory buffer has no error path,
/// so the fallback contract (store raw bytes under the same key) is only
/// exercised through [`decompress`].
#[must_use]
pub fn compress(data: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(data)
}

/// Decompress a snapshot payload.
///
/// Payloads that do not decode as size-prepended LZ4 are returned verbatim;
/// these are uploads that stored raw bytes.
#[must_use]
pub fn decompress(data: &[u8]) -> Vec<u8> {
    match lz4_flex::decompress_size_prepended(data) {
        Ok(decompressed) => decompressed,
        Err(e) => {
            warn!(error = %e, len = data.len(), "payload is not LZ4, treating as raw bytes");
            data.to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let data = b"SQLite format 3\0".repeat(512);
        let compressed = compress(&data);
        assert!(compressed.len() < data.len());
        assert_eq!(decompress(&compressed), data);
    }

    #[test]
    fn test_empty_round_trip() {
        let compressed = compress(b"");
        assert_eq!(decompress(&compressed), b"");
    }

    #[test]
    fn test_raw_fallback() {
        // Bytes that are not a valid LZ4 frame come back untouched.
        let raw = b"not compressed at all";
        assert_eq!(decompress(raw), raw);
    }

    #[test]
    fn test_incompressible_data_still_round_trips() {
        let data: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        assert_eq!(decompress(&compress(&data)), data);
    }
}
