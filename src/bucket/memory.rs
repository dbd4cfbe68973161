//! In-memory bucket

use super::{clamp_range, Bucket, BucketObject, GetOptions, HttpMetadata};
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    etag: String,
    http_metadata: HttpMetadata,
}

/// Bucket backed by a `HashMap`
///
/// Each `put` assigns a fresh ETag, so replacing an object is observable by
/// readers holding the previous one.
#[derive(Default)]
pub struct MemoryBucket {
    objects: RwLock<HashMap<String, StoredObject>>,
    generation: AtomicU64,
    gets: AtomicU64,
}

impl MemoryBucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object, returning its new ETag
    pub fn put(&self, key: impl Into<String>, data: impl Into<Bytes>) -> String {
        self.put_with_metadata(key, data, HttpMetadata::default())
    }

    pub fn put_with_metadata(
        &self,
        key: impl Into<String>,
        data: impl Into<Bytes>,
        http_metadata: HttpMetadata,
    ) -> String {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let etag = format!("\"mem-{}\"", generation);
        self.objects.write().insert(
            key.into(),
            StoredObject {
                data: data.into(),
                etag: etag.clone(),
                http_metadata,
            },
        );
        etag
    }

    pub fn remove(&self, key: &str) -> bool {
        self.objects.write().remove(key).is_some()
    }

    /// Number of `get` calls served so far
    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Bucket for MemoryBucket {
    async fn get(&self, key: &str, options: GetOptions) -> Result<Option<BucketObject>> {
        self.gets.fetch_add(1, Ordering::Relaxed);

        let stored = match self.objects.read().get(key) {
            Some(stored) => stored.clone(),
            None => return Ok(None),
        };

        let size = stored.data.len() as u64;
        let condition_holds = options
            .etag_matches
            .as_ref()
            .map_or(true, |etag| *etag == stored.etag);

        let body = if condition_holds {
            let (start, end) = clamp_range(options.range, size);
            Some(stored.data.slice(start as usize..end as usize))
        } else {
            None
        };

        Ok(Some(BucketObject {
            key: key.to_string(),
            etag: stored.etag,
            size,
            http_metadata: stored.http_metadata,
            body,
        }))
    }
}
