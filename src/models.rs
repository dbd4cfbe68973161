//! Core data models shared across the tile server

use crate::error::{Result, TileError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Address of a single tile within an archive's pyramid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        TileCoord { z, x, y }
    }

    /// Parse a coordinate from raw path parameters
    ///
    /// All three values must be non-negative integers.
    pub fn from_params(z: &str, x: &str, y: &str) -> Result<Self> {
        let z = z
            .parse::<u8>()
            .map_err(|_| TileError::InvalidParameter(format!("z must be a non-negative integer, got '{}'", z)))?;
        let x = x
            .parse::<u32>()
            .map_err(|_| TileError::InvalidParameter(format!("x must be a non-negative integer, got '{}'", x)))?;
        let y = y
            .parse::<u32>()
            .map_err(|_| TileError::InvalidParameter(format!("y must be a non-negative integer, got '{}'", y)))?;
        Ok(TileCoord { z, x, y })
    }
}

/// Tile payload type as recorded in the archive header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TileType {
    Unknown,
    Mvt,
    Png,
    Jpeg,
    Webp,
    Avif,
}

impl TileType {
    /// Decode the header byte
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => TileType::Mvt,
            2 => TileType::Png,
            3 => TileType::Jpeg,
            4 => TileType::Webp,
            5 => TileType::Avif,
            _ => TileType::Unknown,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            TileType::Unknown => 0,
            TileType::Mvt => 1,
            TileType::Png => 2,
            TileType::Jpeg => 3,
            TileType::Webp => 4,
            TileType::Avif => 5,
        }
    }

    /// Map a requested file extension to a tile type
    ///
    /// Unrecognized extensions map to [`TileType::Unknown`], which only
    /// matches archives that are themselves of unknown type.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "mvt" => TileType::Mvt,
            "png" => TileType::Png,
            "jpg" | "jpeg" => TileType::Jpeg,
            "webp" => TileType::Webp,
            "avif" => TileType::Avif,
            _ => TileType::Unknown,
        }
    }

    /// File extension used in tile URL templates
    pub fn extension(self) -> &'static str {
        match self {
            TileType::Mvt => "mvt",
            TileType::Png => "png",
            TileType::Jpeg => "jpg",
            TileType::Webp => "webp",
            TileType::Avif => "avif",
            TileType::Unknown => "bin",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            TileType::Mvt => "application/x-protobuf",
            TileType::Png => "image/png",
            TileType::Jpeg => "image/jpeg",
            TileType::Webp => "image/webp",
            TileType::Avif => "image/avif",
            TileType::Unknown => "application/octet-stream",
        }
    }
}

/// Compression codec tag used for directories, metadata and tiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Compression {
    Unknown,
    None,
    Gzip,
    Brotli,
    Zstd,
}

impl Compression {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Compression::None,
            2 => Compression::Gzip,
            3 => Compression::Brotli,
            4 => Compression::Zstd,
            _ => Compression::Unknown,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Compression::Unknown => 0,
            Compression::None => 1,
            Compression::Gzip => 2,
            Compression::Brotli => 3,
            Compression::Zstd => 4,
        }
    }
}

/// A byte range requested by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RangeRequest {
    /// First byte (inclusive)
    pub offset: u64,
    /// Number of bytes, always greater than zero
    pub length: u64,
}

impl RangeRequest {
    pub fn new(offset: u64, length: u64) -> Self {
        RangeRequest { offset, length }
    }

    /// Last byte position (inclusive)
    pub fn end(&self) -> u64 {
        self.offset + self.length - 1
    }

    /// Parse an HTTP Range header value
    ///
    /// # Returns
    /// * `Ok(None)` if no header was supplied
    /// * `Ok(Some(RangeRequest))` for a well formed `bytes=start-end`
    /// * `Err(TileError::InvalidRange)` for any other unit or a non-numeric bound
    pub fn parse_header(header: Option<&str>) -> Result<Option<Self>> {
        let header = match header {
            Some(header) => header.trim(),
            None => return Ok(None),
        };

        let (unit, range_part) = header.split_once('=').ok_or_else(|| {
            TileError::InvalidRange(format!("expected 'bytes=start-end', got: {}", header))
        })?;

        if unit.trim() != "bytes" {
            return Err(TileError::InvalidRange(format!(
                "unsupported range unit '{}'",
                unit
            )));
        }

        let (start, end) = range_part.split_once('-').ok_or_else(|| {
            TileError::InvalidRange(format!(
                "invalid range format, expected 'start-end', got: {}",
                range_part
            ))
        })?;

        let start = start
            .trim()
            .parse::<u64>()
            .map_err(|e| TileError::InvalidRange(format!("invalid start value: {}", e)))?;
        let end = end
            .trim()
            .parse::<u64>()
            .map_err(|e| TileError::InvalidRange(format!("invalid end value: {}", e)))?;

        if end < start {
            return Err(TileError::InvalidRange(format!(
                "start ({}) must be <= end ({})",
                start, end
            )));
        }

        let length = (end - start).checked_add(1).ok_or_else(|| {
            TileError::InvalidRange(format!("range {}-{} is too large", start, end))
        })?;

        Ok(Some(RangeRequest {
            offset: start,
            length,
        }))
    }

    /// Convert this range to an HTTP Range header value
    pub fn to_header(&self) -> String {
        format!("bytes={}-{}", self.offset, self.end())
    }
}

/// Bytes returned by a byte-range source together with caching metadata
#[derive(Debug, Clone)]
pub struct RangeResponse {
    pub data: Bytes,
    pub etag: Option<String>,
    pub cache_control: Option<String>,
    pub expires: Option<String>,
}

impl RangeResponse {
    pub fn new(data: Bytes) -> Self {
        RangeResponse {
            data,
            etag: None,
            cache_control: None,
            expires: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_absent_header() {
        assert_eq!(RangeRequest::parse_header(None).unwrap(), None);
    }

    #[test]
    fn test_parse_header() {
        let range = RangeRequest::parse_header(Some("bytes=0-99")).unwrap().unwrap();
        assert_eq!(range, RangeRequest::new(0, 100));

        let range = RangeRequest::parse_header(Some("bytes=10-19")).unwrap().unwrap();
        assert_eq!(range, RangeRequest::new(10, 10));
        assert_eq!(range.end(), 19);
    }

    #[test]
    fn test_parse_header_rejects_other_units() {
        assert!(matches!(
            RangeRequest::parse_header(Some("items=0-1")),
            Err(TileError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_parse_header_rejects_non_numeric() {
        assert!(RangeRequest::parse_header(Some("bytes=abc-10")).is_err());
        assert!(RangeRequest::parse_header(Some("bytes=10-")).is_err());
        assert!(RangeRequest::parse_header(Some("bytes")).is_err());
    }

    #[test]
    fn test_parse_header_rejects_inverted() {
        assert!(RangeRequest::parse_header(Some("bytes=20-10")).is_err());
    }

    #[test]
    fn test_to_header() {
        assert_eq!(RangeRequest::new(0, 1024).to_header(), "bytes=0-1023");
    }

    #[test]
    fn test_tile_coord_from_params() {
        assert_eq!(
            TileCoord::from_params("5", "10", "12").unwrap(),
            TileCoord::new(5, 10, 12)
        );
        assert!(TileCoord::from_params("-1", "0", "0").is_err());
        assert!(TileCoord::from_params("1", "x", "0").is_err());
        assert!(TileCoord::from_params("1", "0", "1.5").is_err());
    }

    #[test]
    fn test_tile_type_extension_mapping() {
        assert_eq!(TileType::from_extension("mvt"), TileType::Mvt);
        assert_eq!(TileType::from_extension("JPG"), TileType::Jpeg);
        assert_eq!(TileType::from_extension("tiff"), TileType::Unknown);
        assert_eq!(TileType::Mvt.content_type(), "application/x-protobuf");
        assert_eq!(TileType::Unknown.content_type(), "application/octet-stream");
        for value in 0..=5u8 {
            assert_eq!(TileType::from_u8(value).as_u8(), value);
        }
    }

    #[test]
    fn test_compression_from_u8() {
        assert_eq!(Compression::from_u8(2), Compression::Gzip);
        assert_eq!(Compression::from_u8(4), Compression::Zstd);
        assert_eq!(Compression::from_u8(99), Compression::Unknown);
    }
}
