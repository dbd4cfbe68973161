//! Tile and TileJSON resolution against one archive

use super::cache::ResolvedCache;
use super::directory::find_tile;
use super::header::Header;
use super::tile_id::zxy_to_tile_id;
use crate::error::{Result, TileError};
use crate::models::{TileCoord, TileType};
use crate::source::RangeSource;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Directories read per lookup: the root plus at most three leaf levels
const MAX_DIRECTORY_DEPTH: usize = 4;

/// Location of a tile payload inside an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTile {
    pub offset: u64,
    pub length: u64,
    pub content_type: &'static str,
}

/// Decompressed tile payload plus the caching metadata of its archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilePayload {
    pub data: Bytes,
    pub content_type: &'static str,
    pub etag: Option<String>,
    pub cache_control: Option<String>,
    pub expires: Option<String>,
}

/// TileJSON 3.0.0 document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileJson {
    pub tilejson: String,
    pub name: String,
    pub description: Value,
    pub attribution: Value,
    pub scheme: String,
    pub tiles: Vec<String>,
    pub version: Value,
    pub bounds: [f64; 4],
    pub center: [f64; 3],
    pub minzoom: u8,
    pub maxzoom: u8,
    pub vector_layers: Value,
}

/// Reader over a single archive
///
/// Readers are cheap and created per request; all of them share the
/// [`ResolvedCache`] they are given.
pub struct ArchiveReader {
    source: Arc<dyn RangeSource>,
    cache: Arc<ResolvedCache>,
}

impl ArchiveReader {
    pub fn new(source: Arc<dyn RangeSource>, cache: Arc<ResolvedCache>) -> Self {
        ArchiveReader { source, cache }
    }

    pub fn key(&self) -> &str {
        self.source.key()
    }

    /// Drop cached state for this archive when it changed underneath us
    fn on_error<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(TileError::EtagMismatch { .. }) = &result {
            warn!("Archive {} changed during read, invalidating cached state", self.key());
            self.cache.invalidate(self.key());
        }
        result
    }

    pub async fn header(&self) -> Result<Arc<Header>> {
        let result = self.cache.get_header(self.source.as_ref()).await;
        self.on_error(result)
    }

    pub async fn metadata(&self) -> Result<Arc<Value>> {
        let header = self.header().await?;
        let result = self.cache.get_metadata(self.source.as_ref(), &header).await;
        self.on_error(result)
    }

    /// Resolve a coordinate to the byte range of its payload
    ///
    /// # Returns
    /// * `Ok(Some(ResolvedTile))` when the archive holds the tile
    /// * `Ok(None)` when no tile exists at that coordinate
    /// * `Err(TileError::TileTypeMismatch)` / `Err(TileError::ZoomBelowMinimum)` (400)
    /// * `Err(TileError::ZoomAboveMaximum)` (404)
    pub async fn retrieve_tile(
        &self,
        tile_type: TileType,
        coord: TileCoord,
    ) -> Result<Option<ResolvedTile>> {
        let header = self.header().await?;

        if tile_type != header.tile_type {
            return Err(TileError::TileTypeMismatch {
                requested: tile_type,
                actual: header.tile_type,
            });
        }
        if coord.z < header.min_zoom {
            return Err(TileError::ZoomBelowMinimum {
                zoom: coord.z,
                min_zoom: header.min_zoom,
            });
        }
        if coord.z > header.max_zoom {
            return Err(TileError::ZoomAboveMaximum {
                zoom: coord.z,
                max_zoom: header.max_zoom,
            });
        }

        let tile_id = match zxy_to_tile_id(coord) {
            Some(id) => id,
            None => {
                debug!("Coordinate {:?} is outside the pyramid of {}", coord, self.key());
                return Ok(None);
            }
        };

        let result = self.descend(&header, tile_id).await;
        self.on_error(result)
    }

    fn absolute_offset(&self, section: u64, relative: u64) -> Result<u64> {
        section.checked_add(relative).ok_or_else(|| {
            TileError::InvalidArchive(format!(
                "entry offset {} overflows section at {} in {}",
                relative,
                section,
                self.key()
            ))
        })
    }

    async fn descend(&self, header: &Header, tile_id: u64) -> Result<Option<ResolvedTile>> {
        let mut offset = header.root_directory_offset;
        let mut length = header.root_directory_length;

        for _ in 0..MAX_DIRECTORY_DEPTH {
            let directory = self
                .cache
                .get_directory(self.source.as_ref(), header, offset, length)
                .await?;

            match find_tile(&directory, tile_id) {
                Some(entry) if !entry.is_leaf_pointer() => {
                    return Ok(Some(ResolvedTile {
                        offset: self.absolute_offset(header.tile_data_offset, entry.offset)?,
                        length: u64::from(entry.length),
                        content_type: header.tile_type.content_type(),
                    }));
                }
                Some(entry) => {
                    offset = self.absolute_offset(header.leaf_directory_offset, entry.offset)?;
                    length = u64::from(entry.length);
                }
                None => return Ok(None),
            }
        }

        Err(TileError::InvalidArchive(format!(
            "directory nesting in {} exceeds {} levels",
            self.key(),
            MAX_DIRECTORY_DEPTH
        )))
    }

    /// Read and decompress a resolved tile payload
    pub async fn fetch_tile(&self, tile: &ResolvedTile) -> Result<TilePayload> {
        let header = self.header().await?;
        let result = self
            .source
            .get_bytes(tile.offset, tile.length, None, header.etag.as_deref())
            .await;
        let response = self.on_error(result)?;

        let data = self
            .cache
            .decompressor()
            .decode(response.data, header.tile_compression)?;

        Ok(TilePayload {
            data,
            content_type: tile.content_type,
            etag: response.etag,
            cache_control: response.cache_control,
            expires: response.expires,
        })
    }

    /// Resolve and read a tile in one step
    pub async fn get_tile(&self, tile_type: TileType, coord: TileCoord) -> Result<Option<TilePayload>> {
        match self.retrieve_tile(tile_type, coord).await? {
            Some(tile) => Ok(Some(self.fetch_tile(&tile).await?)),
            None => Ok(None),
        }
    }

    /// Build the TileJSON document for this archive
    ///
    /// `base_url` is the public origin tiles are served from; the tile
    /// template becomes `{base_url}/{name}/{z}/{x}/{y}.{ext}`.
    pub async fn retrieve_tilejson(&self, name: &str, base_url: &str) -> Result<TileJson> {
        let (header, metadata) = tokio::try_join!(self.header(), self.metadata())?;

        let field = |key: &str| metadata.get(key).cloned().unwrap_or(Value::Null);
        let tiles = format!(
            "{}/{}/{{z}}/{{x}}/{{y}}.{}",
            base_url.trim_end_matches('/'),
            name.trim_matches('/'),
            header.tile_type.extension()
        );

        Ok(TileJson {
            tilejson: "3.0.0".to_string(),
            name: metadata
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(name)
                .to_string(),
            description: field("description"),
            attribution: field("attribution"),
            scheme: "xyz".to_string(),
            tiles: vec![tiles],
            version: field("version"),
            bounds: [header.min_lon, header.min_lat, header.max_lon, header.max_lat],
            center: [header.center_lon, header.center_lat, f64::from(header.center_zoom)],
            minzoom: header.min_zoom,
            maxzoom: header.max_zoom,
            vector_layers: metadata
                .get("vector_layers")
                .cloned()
                .unwrap_or_else(|| Value::Array(Vec::new())),
        })
    }
}
