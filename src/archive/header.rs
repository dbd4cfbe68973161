//! Fixed-size archive header

use crate::error::{Result, TileError};
use crate::models::{Compression, TileType};
use serde::{Deserialize, Serialize};

/// Size of the encoded header in bytes
pub const HEADER_SIZE: usize = 127;

/// Bytes read on first access; large enough to usually include the root
/// directory as well as the header
pub const INITIAL_FETCH_SIZE: u64 = 16384;

const MAGIC: &[u8; 7] = b"PMTiles";
const FORMAT_VERSION: u8 = 3;

/// Decoded archive header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub format_version: u8,
    pub root_directory_offset: u64,
    pub root_directory_length: u64,
    pub metadata_offset: u64,
    pub metadata_length: u64,
    pub leaf_directory_offset: u64,
    pub leaf_directory_length: u64,
    pub tile_data_offset: u64,
    pub tile_data_length: u64,
    pub num_addressed_tiles: u64,
    pub num_tile_entries: u64,
    pub num_tile_contents: u64,
    pub clustered: bool,
    pub internal_compression: Compression,
    pub tile_compression: Compression,
    pub tile_type: TileType,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
    pub center_zoom: u8,
    pub center_lon: f64,
    pub center_lat: f64,
    /// ETag of the archive object the header was read from
    pub etag: Option<String>,
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn u8(&mut self) -> u8 {
        let v = self.buf[self.pos];
        self.pos += 1;
        v
    }

    fn u64(&mut self) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.buf[self.pos..self.pos + 8]);
        self.pos += 8;
        u64::from_le_bytes(raw)
    }

    fn degrees(&mut self) -> f64 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        i32::from_le_bytes(raw) as f64 / 10_000_000.0
    }
}

impl Header {
    /// Parse the header from the first bytes of an archive
    pub fn parse(bytes: &[u8], etag: Option<String>) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(TileError::InvalidArchive(format!(
                "header needs {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }
        if &bytes[0..7] != MAGIC {
            return Err(TileError::InvalidArchive("wrong magic number".to_string()));
        }
        let format_version = bytes[7];
        if format_version != FORMAT_VERSION {
            return Err(TileError::InvalidArchive(format!(
                "unsupported archive version {}",
                format_version
            )));
        }

        let mut c = Cursor { buf: bytes, pos: 8 };
        Ok(Header {
            format_version,
            root_directory_offset: c.u64(),
            root_directory_length: c.u64(),
            metadata_offset: c.u64(),
            metadata_length: c.u64(),
            leaf_directory_offset: c.u64(),
            leaf_directory_length: c.u64(),
            tile_data_offset: c.u64(),
            tile_data_length: c.u64(),
            num_addressed_tiles: c.u64(),
            num_tile_entries: c.u64(),
            num_tile_contents: c.u64(),
            clustered: c.u8() == 1,
            internal_compression: Compression::from_u8(c.u8()),
            tile_compression: Compression::from_u8(c.u8()),
            tile_type: TileType::from_u8(c.u8()),
            min_zoom: c.u8(),
            max_zoom: c.u8(),
            min_lon: c.degrees(),
            min_lat: c.degrees(),
            max_lon: c.degrees(),
            max_lat: c.degrees(),
            center_zoom: c.u8(),
            center_lon: c.degrees(),
            center_lat: c.degrees(),
            etag,
        })
    }

    /// Whether the root directory lies within the first `fetched` bytes
    pub fn root_directory_within(&self, fetched: u64) -> bool {
        self.root_directory_offset
            .checked_add(self.root_directory_length)
            .map_or(false, |end| end <= fetched)
    }
}
