//! Shared fixtures for integration tests: an in-process archive writer and
//! server constructors over a memory bucket.

#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;
use pmtiles_edge::archive::zxy_to_tile_id;
use pmtiles_edge::config::{BucketBackend, BucketConfig, EdgeCacheConfig};
use pmtiles_edge::{MemoryBucket, ServerConfig, TileCoord, TileServer};
use serde_json::{json, Value};
use std::io::Write;
use std::sync::Arc;

pub const COMPRESSION_NONE: u8 = 1;
pub const COMPRESSION_GZIP: u8 = 2;

pub const TILE_MVT: u8 = 1;
pub const TILE_PNG: u8 = 2;

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

struct DirEntry {
    tile_id: u64,
    offset: u64,
    length: u64,
    run_length: u64,
}

fn encode_directory(entries: &[DirEntry]) -> Vec<u8> {
    let mut buf = Vec::new();
    write_varint(&mut buf, entries.len() as u64);
    let mut last = 0;
    for e in entries {
        write_varint(&mut buf, e.tile_id - last);
        last = e.tile_id;
    }
    for e in entries {
        write_varint(&mut buf, e.run_length);
    }
    for e in entries {
        write_varint(&mut buf, e.length);
    }
    for e in entries {
        write_varint(&mut buf, e.offset + 1);
    }
    buf
}

/// Writes small single-file archives
pub struct ArchiveBuilder {
    tile_type: u8,
    tile_compression: u8,
    internal_compression: u8,
    min_zoom: u8,
    max_zoom: u8,
    metadata: Value,
    tiles: Vec<(u64, Vec<u8>)>,
    leaf_size: Option<usize>,
}

impl ArchiveBuilder {
    pub fn new(min_zoom: u8, max_zoom: u8) -> Self {
        ArchiveBuilder {
            tile_type: TILE_MVT,
            tile_compression: COMPRESSION_GZIP,
            internal_compression: COMPRESSION_GZIP,
            min_zoom,
            max_zoom,
            metadata: json!({
                "name": "Test tiles",
                "description": "fixture",
                "attribution": "test data",
                "version": "1.0.0",
                "vector_layers": [{"id": "roads", "fields": {}}]
            }),
            tiles: Vec::new(),
            leaf_size: None,
        }
    }

    pub fn tile_type(mut self, tile_type: u8) -> Self {
        self.tile_type = tile_type;
        self
    }

    pub fn tile_compression(mut self, compression: u8) -> Self {
        self.tile_compression = compression;
        self
    }

    pub fn internal_compression(mut self, compression: u8) -> Self {
        self.internal_compression = compression;
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Split tile entries into leaf directories of `size` entries each
    pub fn leaf_size(mut self, size: usize) -> Self {
        self.leaf_size = Some(size);
        self
    }

    /// Add a tile; `data` is the uncompressed payload
    pub fn tile(mut self, z: u8, x: u32, y: u32, data: &[u8]) -> Self {
        let id = zxy_to_tile_id(TileCoord::new(z, x, y)).unwrap();
        self.tiles.push((id, data.to_vec()));
        self
    }

    fn compress(&self, codec: u8, data: &[u8]) -> Vec<u8> {
        if codec == COMPRESSION_GZIP {
            gzip(data)
        } else {
            data.to_vec()
        }
    }

    pub fn build(mut self) -> Vec<u8> {
        self.tiles.sort_by_key(|(id, _)| *id);

        let mut tile_data = Vec::new();
        let mut entries = Vec::new();
        for (id, data) in &self.tiles {
            let stored = self.compress(self.tile_compression, data);
            entries.push(DirEntry {
                tile_id: *id,
                offset: tile_data.len() as u64,
                length: stored.len() as u64,
                run_length: 1,
            });
            tile_data.extend_from_slice(&stored);
        }

        let mut leaves = Vec::new();
        let root_entries = match self.leaf_size {
            Some(size) => {
                let mut pointers = Vec::new();
                for chunk in entries.chunks(size) {
                    let leaf = self.compress(self.internal_compression, &encode_directory(chunk));
                    pointers.push(DirEntry {
                        tile_id: chunk[0].tile_id,
                        offset: leaves.len() as u64,
                        length: leaf.len() as u64,
                        run_length: 0,
                    });
                    leaves.extend_from_slice(&leaf);
                }
                pointers
            }
            None => entries,
        };

        let root = self.compress(self.internal_compression, &encode_directory(&root_entries));
        let metadata = self.compress(
            self.internal_compression,
            &serde_json::to_vec(&self.metadata).unwrap(),
        );

        let root_offset = 127u64;
        let metadata_offset = root_offset + root.len() as u64;
        let leaf_offset = metadata_offset + metadata.len() as u64;
        let data_offset = leaf_offset + leaves.len() as u64;
        let count = self.tiles.len() as u64;

        let mut buf = Vec::new();
        buf.extend_from_slice(b"PMTiles");
        buf.push(3);
        for v in [
            root_offset,
            root.len() as u64,
            metadata_offset,
            metadata.len() as u64,
            leaf_offset,
            leaves.len() as u64,
            data_offset,
            tile_data.len() as u64,
            count,
            count,
            count,
        ] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf.extend_from_slice(&[
            1,
            self.internal_compression,
            self.tile_compression,
            self.tile_type,
            self.min_zoom,
            self.max_zoom,
        ]);
        for v in [-1_800_000_000i32, -850_000_000, 1_800_000_000, 850_000_000] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf.push(self.min_zoom);
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.extend_from_slice(&0i32.to_le_bytes());
        assert_eq!(buf.len(), 127);

        buf.extend_from_slice(&root);
        buf.extend_from_slice(&metadata);
        buf.extend_from_slice(&leaves);
        buf.extend_from_slice(&tile_data);
        buf
    }
}

/// The archive most tests use: zooms 2..=6 with a handful of tiles
pub fn standard_archive() -> Vec<u8> {
    ArchiveBuilder::new(2, 6)
        .tile(2, 1, 1, b"tile-2-1-1")
        .tile(3, 2, 5, b"tile-3-2-5")
        .tile(5, 10, 12, b"tile-5-10-12")
        .build()
}

pub fn memory_config(edge_cache: bool) -> ServerConfig {
    ServerConfig {
        bucket: BucketConfig {
            backend: BucketBackend::Memory,
            ..Default::default()
        },
        edge_cache: EdgeCacheConfig {
            enabled: edge_cache,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Server over a memory bucket holding `archives` as `(key, bytes)`
pub async fn memory_server(
    config: &ServerConfig,
    archives: Vec<(&str, Vec<u8>)>,
) -> (TileServer, Arc<MemoryBucket>) {
    let bucket = Arc::new(MemoryBucket::new());
    for (key, data) in archives {
        bucket.put(key, data);
    }
    let server = TileServer::with_bucket(config, bucket.clone()).await.unwrap();
    (server, bucket)
}
