//! Object-store bindings
//!
//! A [`Bucket`] is the remote storage collaborator archives are read from. It
//! mirrors the shape of an R2/S3 style binding: `get` a key, optionally
//! restricted to a byte range and conditioned on an ETag, and receive the
//! object's metadata plus (when the condition held) its body.
//!
//! Backends:
//! - [`HttpBucket`]: S3/R2-compatible HTTP endpoint, via `Range` and `If-Match`
//! - [`FsBucket`]: a local directory, for development
//! - [`MemoryBucket`]: in-process map, for tests

mod fs;
mod remote;
mod memory;

pub use self::fs::FsBucket;
pub use self::remote::HttpBucket;
pub use self::memory::MemoryBucket;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Byte window requested from the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketRange {
    pub offset: u64,
    pub length: u64,
}

/// Options for a [`Bucket::get`] call
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    pub range: Option<BucketRange>,
    /// Only return a body when the object's current ETag equals this value
    pub etag_matches: Option<String>,
}

impl GetOptions {
    pub fn range(offset: u64, length: u64) -> Self {
        GetOptions {
            range: Some(BucketRange { offset, length }),
            etag_matches: None,
        }
    }

    pub fn with_etag(mut self, etag: Option<String>) -> Self {
        self.etag_matches = etag;
        self
    }
}

/// HTTP metadata stored alongside an object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpMetadata {
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub cache_expiry: Option<String>,
}

/// Result of a [`Bucket::get`] for a key that exists
#[derive(Debug, Clone)]
pub struct BucketObject {
    pub key: String,
    pub etag: String,
    pub size: u64,
    pub http_metadata: HttpMetadata,
    /// `None` when the ETag precondition failed and only metadata was returned
    pub body: Option<Bytes>,
}

/// A remote object store holding archives
#[async_trait]
pub trait Bucket: Send + Sync {
    /// Fetch an object, or `Ok(None)` when the key does not exist
    async fn get(&self, key: &str, options: GetOptions) -> Result<Option<BucketObject>>;
}

/// Clamp a requested window to an object of `size` bytes
pub(crate) fn clamp_range(range: Option<BucketRange>, size: u64) -> (u64, u64) {
    match range {
        Some(range) => {
            let start = range.offset.min(size);
            let end = range.offset.saturating_add(range.length).min(size);
            (start, end)
        }
        None => (0, size),
    }
}
