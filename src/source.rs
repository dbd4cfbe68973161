//! Byte-range sources
//!
//! A [`RangeSource`] is what the archive reader reads from: a logical key plus
//! conditional byte-range reads. [`BucketSource`] adapts a [`Bucket`] binding,
//! a key prefix and a tile set name into one.

use crate::bucket::{Bucket, GetOptions};
use crate::error::{Result, TileError};
use crate::models::RangeResponse;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Conditional byte-range reads over a single archive
#[async_trait]
pub trait RangeSource: Send + Sync {
    /// Logical identity of the archive, used in cache keys
    fn key(&self) -> &str;

    /// Read `length` bytes starting at `offset`
    ///
    /// When `etag` is given and the object's current ETag differs, the read
    /// fails with [`TileError::EtagMismatch`]. A missing object fails with
    /// [`TileError::ArchiveNotFound`].
    async fn get_bytes(
        &self,
        offset: u64,
        length: u64,
        cancel: Option<&CancellationToken>,
        etag: Option<&str>,
    ) -> Result<RangeResponse>;
}

/// Archive stored in a bucket at `{prefix}{name}.pmtiles`
pub struct BucketSource {
    bucket: Arc<dyn Bucket>,
    object_key: String,
}

impl BucketSource {
    pub fn new(bucket: Arc<dyn Bucket>, prefix: &str, name: &str) -> Self {
        BucketSource {
            bucket,
            object_key: archive_key(prefix, name),
        }
    }
}

/// Object key for a tile set name under a prefix
pub fn archive_key(prefix: &str, name: &str) -> String {
    let name = name.trim_matches('/');
    if prefix.is_empty() {
        format!("{}.pmtiles", name)
    } else if prefix.ends_with('/') {
        format!("{}{}.pmtiles", prefix, name)
    } else {
        format!("{}/{}.pmtiles", prefix, name)
    }
}

#[async_trait]
impl RangeSource for BucketSource {
    fn key(&self) -> &str {
        &self.object_key
    }

    async fn get_bytes(
        &self,
        offset: u64,
        length: u64,
        cancel: Option<&CancellationToken>,
        etag: Option<&str>,
    ) -> Result<RangeResponse> {
        let options = GetOptions::range(offset, length).with_etag(etag.map(str::to_string));
        let fetch = self.bucket.get(&self.object_key, options);

        let object = match cancel {
            Some(token) => {
                tokio::select! {
                    result = fetch => result?,
                    _ = token.cancelled() => {
                        return Err(TileError::Cancelled(self.object_key.clone()));
                    }
                }
            }
            None => fetch.await?,
        };

        let object = object.ok_or_else(|| TileError::ArchiveNotFound(self.object_key.clone()))?;

        if let Some(expected) = etag {
            if object.etag != expected {
                warn!(
                    "ETag changed for {}: expected {}, found {}",
                    self.object_key, expected, object.etag
                );
                return Err(TileError::EtagMismatch {
                    key: self.object_key.clone(),
                    expected: expected.to_string(),
                    actual: object.etag,
                });
            }
        }

        let mut data = object
            .body
            .ok_or_else(|| TileError::EmptyBody(self.object_key.clone()))?;

        if data.len() as u64 > length {
            data.truncate(length as usize);
        }

        debug!(
            "Read {} bytes at offset {} from {}",
            data.len(),
            offset,
            self.object_key
        );

        Ok(RangeResponse {
            data,
            etag: Some(object.etag).filter(|e| !e.is_empty()),
            cache_control: object.http_metadata.cache_control,
            expires: object.http_metadata.cache_expiry,
        })
    }
}
