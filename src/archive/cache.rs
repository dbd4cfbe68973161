//! Shared cache of decoded archive structures
//!
//! One [`ResolvedCache`] is constructed per process and handed to every
//! [`ArchiveReader`](super::ArchiveReader) by reference. It holds decoded
//! headers, directories and metadata keyed by `(archive, offset, length)`,
//! bounded by a fixed entry capacity with least-recently-used eviction. It is
//! read-through only and never writes back to storage.
//!
//! Concurrent misses for the same key are coalesced: each key maps to a
//! `tokio::sync::OnceCell`, the first caller runs the load and the others
//! await its result. A failed load leaves the cell empty and removes it, so
//! the next request simply tries again.

use super::directory::{deserialize_directory, Entry};
use super::header::{Header, INITIAL_FETCH_SIZE};
use crate::decompress::{DefaultDecompressor, Decompressor};
use crate::error::{Result, TileError};
use crate::source::RangeSource;
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

/// Default number of entries held by the cache
pub const DEFAULT_CAPACITY: usize = 25;

/// Cache key: archive identity plus the byte window the value was decoded from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub archive: String,
    pub offset: u64,
    pub length: u64,
}

impl CacheKey {
    pub fn new(archive: &str, offset: u64, length: u64) -> Self {
        CacheKey {
            archive: archive.to_string(),
            offset,
            length,
        }
    }
}

/// A decoded value held in the cache
#[derive(Debug, Clone)]
pub enum CachedValue {
    Header(Arc<Header>),
    Directory(Arc<Vec<Entry>>),
    Metadata(Arc<Value>),
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolvedCacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

type Slot = Arc<OnceCell<CachedValue>>;

/// Bounded LRU cache of decoded archive structures
pub struct ResolvedCache {
    slots: Mutex<LruCache<CacheKey, Slot>>,
    decompressor: Arc<dyn Decompressor>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResolvedCache {
    /// Create a cache holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize, decompressor: Arc<dyn Decompressor>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        ResolvedCache {
            slots: Mutex::new(LruCache::new(capacity)),
            decompressor,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cache with [`DEFAULT_CAPACITY`] and gzip/identity decompression
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_CAPACITY, Arc::new(DefaultDecompressor::new()))
    }

    pub fn decompressor(&self) -> &dyn Decompressor {
        self.decompressor.as_ref()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().cap().get()
    }

    /// Whether `key` is present, without touching its recency
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.slots.lock().contains(key)
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    pub fn stats(&self) -> ResolvedCacheStats {
        let slots = self.slots.lock();
        ResolvedCacheStats {
            entries: slots.len(),
            capacity: slots.cap().get(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Drop every entry belonging to `archive`
    pub fn invalidate(&self, archive: &str) -> usize {
        let mut slots = self.slots.lock();
        let stale: Vec<CacheKey> = slots
            .iter()
            .filter(|(key, _)| key.archive == archive)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            slots.pop(key);
        }
        debug!("Invalidated {} cached entries for {}", stale.len(), archive);
        stale.len()
    }

    /// Return the cached value for `key`, running `load` on a miss
    ///
    /// Concurrent callers for the same key share a single `load`.
    pub async fn get_or_load<F, Fut>(&self, key: CacheKey, load: F) -> Result<CachedValue>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachedValue>>,
    {
        let slot = {
            let mut slots = self.slots.lock();
            match slots.get(&key) {
                Some(slot) => slot.clone(),
                None => {
                    let slot: Slot = Arc::new(OnceCell::new());
                    slots.put(key.clone(), slot.clone());
                    slot
                }
            }
        };

        if let Some(value) = slot.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Resolved cache hit: {}@{}+{}", key.archive, key.offset, key.length);
            return Ok(value.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!("Resolved cache miss: {}@{}+{}", key.archive, key.offset, key.length);

        match slot.get_or_try_init(load).await {
            Ok(value) => Ok(value.clone()),
            Err(e) => {
                let mut slots = self.slots.lock();
                let still_ours = slots
                    .peek(&key)
                    .map_or(false, |current| Arc::ptr_eq(current, &slot) && current.get().is_none());
                if still_ours {
                    slots.pop(&key);
                }
                Err(e)
            }
        }
    }

    /// Insert an already decoded value unless the key is present
    fn insert_ready(&self, key: CacheKey, value: CachedValue) {
        let mut slots = self.slots.lock();
        if !slots.contains(&key) {
            slots.put(key, Arc::new(OnceCell::new_with(Some(value))));
        }
    }

    fn decode_directory(&self, data: Bytes, header: &Header) -> Result<Vec<Entry>> {
        let raw = self.decompressor.decode(data, header.internal_compression)?;
        deserialize_directory(&raw)
    }

    /// Header of the archive behind `source`
    ///
    /// The first read also decodes and caches the root directory when it
    /// falls inside the initial fetch.
    pub async fn get_header(&self, source: &dyn RangeSource) -> Result<Arc<Header>> {
        let key = CacheKey::new(source.key(), 0, INITIAL_FETCH_SIZE);
        let value = self
            .get_or_load(key, || async {
                let response = source.get_bytes(0, INITIAL_FETCH_SIZE, None, None).await?;
                let header = Header::parse(&response.data, response.etag.clone())?;

                if header.root_directory_within(response.data.len() as u64) {
                    let start = header.root_directory_offset as usize;
                    let end = start + header.root_directory_length as usize;
                    let root = self.decode_directory(response.data.slice(start..end), &header)?;
                    self.insert_ready(
                        CacheKey::new(
                            source.key(),
                            header.root_directory_offset,
                            header.root_directory_length,
                        ),
                        CachedValue::Directory(Arc::new(root)),
                    );
                }

                Ok(CachedValue::Header(Arc::new(header)))
            })
            .await?;

        match value {
            CachedValue::Header(header) => Ok(header),
            other => Err(TileError::CacheError(format!(
                "expected header at offset 0 of {}, found {:?}",
                source.key(),
                other
            ))),
        }
    }

    /// Directory stored at `offset..offset + length`
    pub async fn get_directory(
        &self,
        source: &dyn RangeSource,
        header: &Header,
        offset: u64,
        length: u64,
    ) -> Result<Arc<Vec<Entry>>> {
        let key = CacheKey::new(source.key(), offset, length);
        let value = self
            .get_or_load(key, || async {
                let response = source
                    .get_bytes(offset, length, None, header.etag.as_deref())
                    .await?;
                let entries = self.decode_directory(response.data, header)?;
                Ok(CachedValue::Directory(Arc::new(entries)))
            })
            .await?;

        match value {
            CachedValue::Directory(entries) => Ok(entries),
            other => Err(TileError::CacheError(format!(
                "expected directory at offset {} of {}, found {:?}",
                offset,
                source.key(),
                other
            ))),
        }
    }

    /// Decoded JSON metadata of the archive
    pub async fn get_metadata(&self, source: &dyn RangeSource, header: &Header) -> Result<Arc<Value>> {
        let key = CacheKey::new(source.key(), header.metadata_offset, header.metadata_length);
        let value = self
            .get_or_load(key, || async {
                if header.metadata_length == 0 {
                    return Ok(CachedValue::Metadata(Arc::new(Value::Object(Default::default()))));
                }
                let response = source
                    .get_bytes(
                        header.metadata_offset,
                        header.metadata_length,
                        None,
                        header.etag.as_deref(),
                    )
                    .await?;
                let raw = self
                    .decompressor
                    .decode(response.data, header.internal_compression)?;
                let metadata: Value = serde_json::from_slice(&raw)?;
                Ok(CachedValue::Metadata(Arc::new(metadata)))
            })
            .await?;

        match value {
            CachedValue::Metadata(metadata) => Ok(metadata),
            other => Err(TileError::CacheError(format!(
                "expected metadata at offset {} of {}, found {:?}",
                header.metadata_offset,
                source.key(),
                other
            ))),
        }
    }
}
