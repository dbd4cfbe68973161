//! PMTiles Edge
//!
//! An HTTP tile server that answers `/{name}/{z}/{x}/{y}.{ext}` and
//! `/{name}.json` requests straight out of single-file tile archives
//! (PMTiles v3) kept in an object store, reading only the byte ranges it
//! needs.
//!
//! # Features
//!
//! - **Range reads**: headers, directories and tiles are fetched as byte
//!   ranges, conditional on the archive's ETag
//! - **Shared resolved cache**: decoded headers, directories and metadata
//!   are kept in a bounded LRU shared by every request, with concurrent
//!   misses for the same range coalesced into one read
//! - **Edge response cache**: assembled responses are cached by URL in
//!   memory with an optional disk tier, invalidated by version
//! - **Namespaced routes**: `/tiger/...` and `/providers/...` paths map onto
//!   nested archive keys
//! - **CORS**: allow-list and pattern based origin echoing
//! - **Metrics**: Prometheus text exposition at `/metrics`
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use pmtiles_edge::{ServerConfig, TileServer};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::from_file("pmtiles_edge.yaml")?;
//! let server = Arc::new(TileServer::from_config(&config).await?);
//!
//! let listener = tokio::net::TcpListener::bind(config.socket_addr()?).await?;
//! server.serve(listener, std::future::pending()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`Router`]: ordered route table with `:param` patterns
//! - [`EdgeCache`]: URL-keyed cache of assembled responses
//! - [`ArchiveReader`]: tile and TileJSON resolution against one archive
//! - [`ResolvedCache`]: shared cache of decoded archive structures
//! - [`RangeSource`] / [`Bucket`]: byte-range reads from the object store
//! - [`Decompressor`]: payload and directory decompression
//! - [`ResponseAssembler`]: HTTP responses for tiles, TileJSON and errors
//! - [`CorsPolicy`]: cross-origin decoration
//! - [`TileServer`]: wires everything into the request path
//!
//! # Configuration
//!
//! ```yaml
//! listen_address: "0.0.0.0:8080"
//! archive_prefix: "tiles/"
//! bucket:
//!   backend: http
//!   endpoint: "https://bucket.example.com"
//! edge_cache:
//!   version: "v1"
//!   ttl_secs: 86400
//! ```

pub mod archive;
pub mod bucket;
pub mod config;
pub mod cors;
pub mod decompress;
pub mod edge_cache;
pub mod error;
pub mod metrics;
pub mod models;
pub mod response_assembler;
pub mod router;
pub mod server;
pub mod source;

pub use archive::{ArchiveReader, Header, ResolvedCache, TileJson, TilePayload};
pub use bucket::{Bucket, BucketObject, FsBucket, GetOptions, HttpBucket, MemoryBucket};
pub use config::ServerConfig;
pub use cors::CorsPolicy;
pub use decompress::{DefaultDecompressor, Decompressor};
pub use edge_cache::{CachedResponse, EdgeCache, EdgeCacheStats};
pub use error::{ErrorBody, Result, TileError};
pub use metrics::ServerMetrics;
pub use models::{Compression, RangeRequest, RangeResponse, TileCoord, TileType};
pub use response_assembler::ResponseAssembler;
pub use router::{Handler, Route, Router};
pub use server::TileServer;
pub use source::{BucketSource, RangeSource};
