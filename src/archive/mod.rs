//! Archive decoding
//!
//! Reads single-file tile archives (PMTiles v3): a fixed header, a root
//! directory, optional leaf directories, JSON metadata and the tile payloads,
//! all addressed by byte offsets and fetched through a
//! [`RangeSource`](crate::source::RangeSource).

pub mod cache;
pub mod directory;
pub mod header;
pub mod reader;
pub mod tile_id;

pub use cache::{CacheKey, CachedValue, ResolvedCache, ResolvedCacheStats, DEFAULT_CAPACITY};
pub use directory::{deserialize_directory, find_tile, Entry};
pub use header::{Header, HEADER_SIZE, INITIAL_FETCH_SIZE};
pub use reader::{ArchiveReader, ResolvedTile, TileJson, TilePayload};
pub use tile_id::zxy_to_tile_id;
