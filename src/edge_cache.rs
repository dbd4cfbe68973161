//! Edge response cache
//!
//! Holds fully assembled HTTP responses keyed by request URL so repeat
//! requests skip archive resolution entirely. Two tiers:
//! - L1: in-memory LRU bounded by a byte budget
//! - L2: optional on-disk store, written behind by a background task
//!
//! Every key lives under `"{namespace}/{version}/{url}"`; bumping the
//! version makes all earlier entries unreachable and purges them.

use crate::config::EdgeCacheConfig;
use crate::error::{Result, TileError};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, VARY};
use http::{HeaderMap, Response, StatusCode};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use xxhash_rust::xxh3::xxh3_64;

/// A cacheable snapshot of an assembled response
///
/// CORS headers and `Vary` are never stored; they depend on the requesting
/// origin and are re-applied on every hit.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CachedResponse {
    pub fn from_response(response: &Response<Bytes>) -> Self {
        let mut headers = response.headers().clone();
        strip_origin_headers(&mut headers);
        CachedResponse {
            status: response.status(),
            headers,
            body: response.body().clone(),
        }
    }

    pub fn to_response(&self) -> Response<Bytes> {
        let mut response = Response::new(self.body.clone());
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }

    fn weight(&self) -> usize {
        let header_bytes: usize = self
            .headers
            .iter()
            .map(|(name, value)| name.as_str().len() + value.len())
            .sum();
        self.body.len() + header_bytes
    }
}

fn strip_origin_headers(headers: &mut HeaderMap) {
    let cors: Vec<HeaderName> = headers
        .keys()
        .filter(|name| name.as_str().starts_with("access-control-"))
        .cloned()
        .collect();
    for name in cors {
        headers.remove(name);
    }
    headers.remove(VARY);
}

/// On-disk representation of one entry
#[derive(Serialize, Deserialize)]
struct DiskRecord {
    key: String,
    expires_at_secs: u64,
    status: u16,
    headers: Vec<(String, Vec<u8>)>,
    body: Vec<u8>,
}

impl DiskRecord {
    fn new(key: String, response: &CachedResponse, expires_at: SystemTime) -> Self {
        DiskRecord {
            key,
            expires_at_secs: expires_at
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            status: response.status.as_u16(),
            headers: response
                .headers
                .iter()
                .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
                .collect(),
            body: response.body.to_vec(),
        }
    }

    fn expires_at(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.expires_at_secs)
    }

    fn into_response(self) -> Option<CachedResponse> {
        let status = StatusCode::from_u16(self.status).ok()?;
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in self.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
            let value = HeaderValue::from_bytes(&value).ok()?;
            headers.append(name, value);
        }
        Some(CachedResponse {
            status,
            headers,
            body: Bytes::from(self.body),
        })
    }
}

/// Message for the write-behind disk task
#[derive(Debug)]
enum DiskWriteMessage {
    Write {
        generation: String,
        key: String,
        response: CachedResponse,
        expires_at: SystemTime,
    },
    RemoveGeneration {
        generation: String,
    },
    Shutdown,
}

struct L1Entry {
    response: CachedResponse,
    expires_at: SystemTime,
    weight: usize,
}

struct L1Storage {
    entries: LruCache<String, L1Entry>,
    bytes: usize,
}

impl L1Storage {
    fn remove(&mut self, key: &str) {
        if let Some(old) = self.entries.pop(key) {
            self.bytes = self.bytes.saturating_sub(old.weight);
        }
    }
}

/// Edge cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeCacheStats {
    pub l1_entries: usize,
    pub l1_bytes: usize,
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub disk_writes: u64,
    pub disk_errors: u64,
}

/// Two-tier cache of assembled responses
pub struct EdgeCache {
    namespace: String,
    version: RwLock<String>,
    ttl: Duration,

    l1: Mutex<L1Storage>,
    l1_max_bytes: usize,

    l2_base_path: Option<PathBuf>,
    disk_writer_tx: Option<mpsc::UnboundedSender<DiskWriteMessage>>,

    stats: Arc<Mutex<EdgeCacheStats>>,
}

impl EdgeCache {
    /// Build the cache described by `config`
    ///
    /// Falls back to memory-only when the disk directory cannot be created.
    pub async fn new(config: &EdgeCacheConfig) -> Result<Self> {
        let ttl = Duration::from_secs(config.ttl_secs);
        let mut cache = Self::memory_only(
            &config.namespace,
            &config.version,
            ttl,
            config.max_memory_bytes,
        );

        let Some(dir) = &config.disk_dir else {
            return Ok(cache);
        };

        let base_path = PathBuf::from(dir);
        if let Err(e) = fs::create_dir_all(&base_path).await {
            warn!("Failed to create edge cache directory {}: {}", dir, e);
            return Ok(cache);
        }

        info!(
            "Initializing edge cache: L1={}MB, L2={:?}, version={}",
            config.max_memory_bytes / 1024 / 1024,
            base_path,
            config.version
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let writer_path = base_path.clone();
        let writer_stats = cache.stats.clone();
        tokio::spawn(async move {
            Self::disk_writer_task(rx, writer_path, writer_stats).await;
        });

        cache.l2_base_path = Some(base_path);
        cache.disk_writer_tx = Some(tx);
        Ok(cache)
    }

    /// Create a memory-only cache (L2 disabled)
    pub fn memory_only(namespace: &str, version: &str, ttl: Duration, max_bytes: usize) -> Self {
        EdgeCache {
            namespace: namespace.to_string(),
            version: RwLock::new(version.to_string()),
            ttl,
            l1: Mutex::new(L1Storage {
                entries: LruCache::unbounded(),
                bytes: 0,
            }),
            l1_max_bytes: max_bytes,
            l2_base_path: None,
            disk_writer_tx: None,
            stats: Arc::new(Mutex::new(EdgeCacheStats::default())),
        }
    }

    pub fn version(&self) -> String {
        self.version.read().clone()
    }

    fn generation(&self) -> String {
        format!("{}/{}", self.namespace, self.version.read())
    }

    /// Full cache key for a request URL
    pub fn cache_key(&self, url: &str) -> String {
        format!("{}/{}", self.generation(), url)
    }

    /// Look a URL up, L1 first then L2
    pub async fn get(&self, url: &str) -> Option<CachedResponse> {
        let key = self.cache_key(url);
        let now = SystemTime::now();

        let l1_hit = {
            let mut l1 = self.l1.lock();
            let state = l1
                .entries
                .get(&key)
                .map(|entry| (entry.expires_at > now, entry.response.clone()));
            match state {
                Some((true, response)) => Some(response),
                Some((false, _)) => {
                    l1.remove(&key);
                    None
                }
                None => None,
            }
        };

        if let Some(response) = l1_hit {
            self.stats.lock().l1_hits += 1;
            debug!("Edge cache L1 hit: {}", key);
            return Some(response);
        }

        self.get_l2(&key, now).await
    }

    async fn get_l2(&self, key: &str, now: SystemTime) -> Option<CachedResponse> {
        let found = match &self.l2_base_path {
            Some(base) => {
                let path = Self::l2_file_path(base, &self.generation(), key);
                Self::read_from_disk(&path, key, now).await
            }
            None => None,
        };

        match found {
            Some((response, expires_at)) => {
                self.store_l1(key, response.clone(), expires_at);
                self.stats.lock().l2_hits += 1;
                debug!("Edge cache L2 hit (promoted to L1): {}", key);
                Some(response)
            }
            None => {
                self.stats.lock().misses += 1;
                debug!("Edge cache miss: {}", key);
                None
            }
        }
    }

    /// Store a response under a URL (L1 now, L2 behind)
    pub fn put(&self, url: &str, response: CachedResponse) {
        let key = self.cache_key(url);
        let expires_at = SystemTime::now() + self.ttl;

        if !self.store_l1(&key, response.clone(), expires_at) {
            return;
        }
        self.stats.lock().stores += 1;

        if let Some(tx) = &self.disk_writer_tx {
            let _ = tx.send(DiskWriteMessage::Write {
                generation: self.generation(),
                key,
                response,
                expires_at,
            });
        }
    }

    /// Store in L1 with LRU eviction; entries larger than the whole budget are skipped
    fn store_l1(&self, key: &str, response: CachedResponse, expires_at: SystemTime) -> bool {
        let weight = response.weight();
        if weight > self.l1_max_bytes {
            debug!("Response for {} exceeds the edge cache budget ({} bytes)", key, weight);
            return false;
        }

        let mut l1 = self.l1.lock();
        l1.remove(key);

        while l1.bytes + weight > self.l1_max_bytes {
            match l1.entries.pop_lru() {
                Some((evicted, entry)) => {
                    l1.bytes = l1.bytes.saturating_sub(entry.weight);
                    debug!("Evicted LRU entry from edge cache: {}", evicted);
                }
                None => break,
            }
        }

        l1.entries.put(
            key.to_string(),
            L1Entry {
                response,
                expires_at,
                weight,
            },
        );
        l1.bytes += weight;
        true
    }

    /// Switch to a new cache generation
    ///
    /// Entries stored under the previous version are dropped from memory and
    /// their disk directory is removed in the background.
    pub fn set_version(&self, version: &str) {
        let previous = {
            let mut current = self.version.write();
            if *current == version {
                return;
            }
            std::mem::replace(&mut *current, version.to_string())
        };
        let old_generation = format!("{}/{}", self.namespace, previous);
        info!("Edge cache version {} -> {}", previous, version);

        {
            let mut l1 = self.l1.lock();
            let prefix = format!("{}/", old_generation);
            let stale: Vec<String> = l1
                .entries
                .iter()
                .filter(|(key, _)| key.starts_with(&prefix))
                .map(|(key, _)| key.clone())
                .collect();
            for key in stale {
                l1.remove(&key);
            }
        }

        if let Some(tx) = &self.disk_writer_tx {
            let _ = tx.send(DiskWriteMessage::RemoveGeneration {
                generation: old_generation,
            });
        }
    }

    pub fn stats(&self) -> EdgeCacheStats {
        let mut stats = self.stats.lock().clone();
        let l1 = self.l1.lock();
        stats.l1_entries = l1.entries.len();
        stats.l1_bytes = l1.bytes;
        stats
    }

    /// Stop the disk writer after it drains queued writes
    pub fn shutdown(&self) {
        if let Some(tx) = &self.disk_writer_tx {
            let _ = tx.send(DiskWriteMessage::Shutdown);
        }
    }

    async fn disk_writer_task(
        mut rx: mpsc::UnboundedReceiver<DiskWriteMessage>,
        base_path: PathBuf,
        stats: Arc<Mutex<EdgeCacheStats>>,
    ) {
        info!("Edge cache disk writer started");

        while let Some(msg) = rx.recv().await {
            match msg {
                DiskWriteMessage::Write {
                    generation,
                    key,
                    response,
                    expires_at,
                } => {
                    let path = Self::l2_file_path(&base_path, &generation, &key);
                    let record = DiskRecord::new(key, &response, expires_at);
                    if let Err(e) = Self::write_to_disk(&path, &record).await {
                        error!("Failed to write edge cache entry: {}", e);
                        stats.lock().disk_errors += 1;
                    } else {
                        stats.lock().disk_writes += 1;
                    }
                }
                DiskWriteMessage::RemoveGeneration { generation } => {
                    let dir = Self::generation_dir(&base_path, &generation);
                    match fs::remove_dir_all(&dir).await {
                        Ok(()) => debug!("Removed edge cache generation {}", generation),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => warn!("Failed to remove {}: {}", dir.display(), e),
                    }
                }
                DiskWriteMessage::Shutdown => {
                    info!("Edge cache disk writer shutting down");
                    break;
                }
            }
        }
    }

    async fn write_to_disk(path: &Path, record: &DiskRecord) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                TileError::CacheError(format!("Failed to create cache directory: {}", e))
            })?;
        }

        let encoded = bincode::serialize(record)
            .map_err(|e| TileError::CacheError(format!("Failed to encode entry: {}", e)))?;

        let mut file = fs::File::create(path).await.map_err(|e| {
            TileError::CacheError(format!("Failed to create cache file: {}", e))
        })?;
        file.write_all(&encoded)
            .await
            .map_err(|e| TileError::CacheError(format!("Failed to write entry: {}", e)))?;
        file.sync_all()
            .await
            .map_err(|e| TileError::CacheError(format!("Failed to sync file: {}", e)))?;

        debug!("Wrote edge cache entry {} ({} bytes)", record.key, encoded.len());
        Ok(())
    }

    async fn read_from_disk(
        path: &Path,
        key: &str,
        now: SystemTime,
    ) -> Option<(CachedResponse, SystemTime)> {
        let data = fs::read(path).await.ok()?;

        let record: DiskRecord = match bincode::deserialize(&data) {
            Ok(record) => record,
            Err(e) => {
                warn!("Discarding unreadable edge cache file {}: {}", path.display(), e);
                let _ = fs::remove_file(path).await;
                return None;
            }
        };

        if record.key != key {
            return None;
        }
        let expires_at = record.expires_at();
        if expires_at <= now {
            let _ = fs::remove_file(path).await;
            return None;
        }

        record.into_response().map(|response| (response, expires_at))
    }

    fn generation_dir(base_path: &Path, generation: &str) -> PathBuf {
        base_path.join(format!("{:016x}", xxh3_64(generation.as_bytes())))
    }

    /// `{base}/{generation hash}/{XX}/{key hash}.bin`
    fn l2_file_path(base_path: &Path, generation: &str, key: &str) -> PathBuf {
        let hash = xxh3_64(key.as_bytes());
        Self::generation_dir(base_path, generation)
            .join(format!("{:02x}", hash & 0xFF))
            .join(format!("{:016x}.bin", hash))
    }
}

impl Drop for EdgeCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONTENT_TYPE};
    use tempfile::TempDir;

    fn response(body: &'static [u8]) -> Response<Bytes> {
        Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/x-protobuf")
            .header(CACHE_CONTROL, "public, max-age=86400")
            .header(ACCESS_CONTROL_ALLOW_ORIGIN, "https://isp.nexus")
            .header(VARY, "Origin")
            .body(Bytes::from_static(body))
            .unwrap()
    }

    fn disk_config(dir: &TempDir, version: &str) -> EdgeCacheConfig {
        EdgeCacheConfig {
            version: version.to_string(),
            disk_dir: Some(dir.path().to_string_lossy().into_owned()),
            ..Default::default()
        }
    }

    #[test]
    fn test_origin_headers_are_not_stored() {
        let cached = CachedResponse::from_response(&response(b"tile"));
        assert!(cached.headers.get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        assert!(cached.headers.get(VARY).is_none());
        assert_eq!(cached.headers[CONTENT_TYPE], "application/x-protobuf");

        let restored = cached.to_response();
        assert_eq!(restored.status(), StatusCode::OK);
        assert_eq!(restored.body().as_ref(), b"tile");
    }

    #[tokio::test]
    async fn test_memory_hit_and_miss() {
        let cache = EdgeCache::memory_only("ns", "v1", Duration::from_secs(60), 1024 * 1024);

        assert!(cache.get("https://tiles/a/1/0/0.mvt").await.is_none());
        cache.put(
            "https://tiles/a/1/0/0.mvt",
            CachedResponse::from_response(&response(b"abc")),
        );

        let hit = cache.get("https://tiles/a/1/0/0.mvt").await.unwrap();
        assert_eq!(hit.body.as_ref(), b"abc");
        assert_eq!(cache.cache_key("u"), "ns/v1/u");

        let stats = cache.stats();
        assert_eq!(stats.l1_hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.l1_entries, 1);
    }

    #[tokio::test]
    async fn test_expired_entries_miss() {
        let cache = EdgeCache::memory_only("ns", "v1", Duration::from_secs(0), 1024);
        cache.put("u", CachedResponse::from_response(&response(b"abc")));
        assert!(cache.get("u").await.is_none());
        assert_eq!(cache.stats().l1_entries, 0);
    }

    #[tokio::test]
    async fn test_byte_budget_evicts_least_recent() {
        let one = CachedResponse::from_response(&response(b"0123456789"));
        let budget = one.weight() * 2;
        let cache = EdgeCache::memory_only("ns", "v1", Duration::from_secs(60), budget);

        cache.put("a", one.clone());
        cache.put("b", one.clone());
        assert!(cache.get("a").await.is_some());
        cache.put("c", one);

        assert!(cache.get("a").await.is_some());
        assert!(cache.get("b").await.is_none());
        assert!(cache.get("c").await.is_some());
        assert!(cache.stats().l1_bytes <= budget);
    }

    #[tokio::test]
    async fn test_oversized_response_is_skipped() {
        let cache = EdgeCache::memory_only("ns", "v1", Duration::from_secs(60), 8);
        cache.put("big", CachedResponse::from_response(&response(b"far too large")));
        assert!(cache.get("big").await.is_none());
        assert_eq!(cache.stats().stores, 0);
    }

    #[tokio::test]
    async fn test_version_bump_hides_old_entries() {
        let cache = EdgeCache::memory_only("ns", "v1", Duration::from_secs(60), 1024 * 1024);
        cache.put("u", CachedResponse::from_response(&response(b"old")));

        cache.set_version("v2");
        assert_eq!(cache.version(), "v2");
        assert!(cache.get("u").await.is_none());
        assert_eq!(cache.stats().l1_entries, 0);

        cache.put("u", CachedResponse::from_response(&response(b"new")));
        assert_eq!(cache.get("u").await.unwrap().body.as_ref(), b"new");
    }

    #[tokio::test]
    async fn test_disk_tier_survives_restart() {
        let dir = TempDir::new().unwrap();

        {
            let cache = EdgeCache::new(&disk_config(&dir, "v1")).await.unwrap();
            cache.put("u", CachedResponse::from_response(&response(b"persisted")));
            for _ in 0..50 {
                if cache.stats().disk_writes == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            assert_eq!(cache.stats().disk_writes, 1);
        }

        let cache = EdgeCache::new(&disk_config(&dir, "v1")).await.unwrap();
        let hit = cache.get("u").await.unwrap();
        assert_eq!(hit.body.as_ref(), b"persisted");
        assert_eq!(hit.headers[CACHE_CONTROL], "public, max-age=86400");
        assert_eq!(cache.stats().l2_hits, 1);

        let other_version = EdgeCache::new(&disk_config(&dir, "v2")).await.unwrap();
        assert!(other_version.get("u").await.is_none());
    }
}
