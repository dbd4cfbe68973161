//! Decompression of archive payloads
//!
//! Directories, metadata and tiles inside an archive each carry a codec tag.
//! The [`Decompressor`] trait maps a tag to a decode function so new codecs can
//! be plugged in without touching directory resolution.

use crate::error::{Result, TileError};
use crate::models::Compression;
use bytes::Bytes;
use flate2::read::GzDecoder;
use std::io::Read;
use tracing::debug;

/// Codec dispatch for archive payloads
pub trait Decompressor: Send + Sync {
    /// Decode `data` that was compressed with `codec`
    fn decode(&self, data: Bytes, codec: Compression) -> Result<Bytes>;
}

/// Decompressor supporting identity and gzip
///
/// Every other codec is rejected with [`TileError::UnsupportedCompression`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDecompressor;

impl DefaultDecompressor {
    pub fn new() -> Self {
        DefaultDecompressor
    }

    fn decompress_gzip(&self, data: &[u8]) -> Result<Bytes> {
        let mut decoder = GzDecoder::new(data);
        let mut decompressed = Vec::with_capacity(data.len() * 2);
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| TileError::DecompressionError(format!("gzip inflate failed: {}", e)))?;

        debug!(
            "Decompressed gzip {} -> {} bytes",
            data.len(),
            decompressed.len()
        );
        Ok(Bytes::from(decompressed))
    }
}

impl Decompressor for DefaultDecompressor {
    fn decode(&self, data: Bytes, codec: Compression) -> Result<Bytes> {
        match codec {
            Compression::None | Compression::Unknown => Ok(data),
            Compression::Gzip => self.decompress_gzip(&data),
            other => Err(TileError::UnsupportedCompression(other)),
        }
    }
}
