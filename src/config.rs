//! Configuration management for the tile server

use crate::bucket::{Bucket, FsBucket, HttpBucket, MemoryBucket};
use crate::error::{Result, TileError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for the tile server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP server binds to (default: 0.0.0.0:8080)
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Public origin used in TileJSON tile templates
    /// If not set, the request's Host header is used
    #[serde(default)]
    pub public_url: Option<String>,

    /// Key prefix under which archives live in the bucket (default: "")
    #[serde(default)]
    pub archive_prefix: String,

    /// Object store holding the archives
    #[serde(default)]
    pub bucket: BucketConfig,

    /// Entries held by the shared resolved-value cache (default: 25)
    #[serde(default = "default_resolved_cache_capacity")]
    pub resolved_cache_capacity: usize,

    /// Edge response cache configuration
    #[serde(default)]
    pub edge_cache: EdgeCacheConfig,

    /// Cross-origin policy
    #[serde(default)]
    pub cors: CorsConfig,

    /// Whether to serve Prometheus metrics at /metrics (default: true)
    #[serde(default = "default_true")]
    pub enable_metrics: bool,
}

/// Object store backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketBackend {
    /// S3/R2-compatible HTTP endpoint
    Http,
    /// Local directory
    Fs,
    /// In-process map, empty at startup
    Memory,
}

/// Configuration for the object store binding
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BucketConfig {
    #[serde(default = "default_backend")]
    pub backend: BucketBackend,

    /// Base URL for the `http` backend
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Root directory for the `fs` backend
    #[serde(default)]
    pub root: Option<String>,

    /// Request timeout for the `http` backend in seconds (default: 30)
    #[serde(default = "default_bucket_timeout")]
    pub timeout_secs: u64,
}

/// Configuration for the edge response cache
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EdgeCacheConfig {
    /// Whether to cache assembled responses (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Namespace prefix of every cache key (default: "tile-responses")
    #[serde(default = "default_edge_namespace")]
    pub namespace: String,

    /// Cache generation; changing it invalidates every prior entry (default: "v1")
    #[serde(default = "default_edge_version")]
    pub version: String,

    /// In-memory budget in bytes (default: 64MB)
    #[serde(default = "default_edge_memory")]
    pub max_memory_bytes: usize,

    /// Lifetime of a cached response in seconds (default: 86400)
    #[serde(default = "default_edge_ttl")]
    pub ttl_secs: u64,

    /// Optional directory for the on-disk tier
    #[serde(default)]
    pub disk_dir: Option<String>,
}

/// Cross-origin policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorsConfig {
    /// Origins echoed back verbatim
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// Regular expressions for additional allowed origins
    #[serde(default = "default_origin_patterns")]
    pub origin_patterns: Vec<String>,

    /// Value list of Access-Control-Allow-Headers
    #[serde(default = "default_allowed_headers")]
    pub allowed_headers: Vec<String>,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            endpoint: None,
            root: None,
            timeout_secs: default_bucket_timeout(),
        }
    }
}

impl Default for EdgeCacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            namespace: default_edge_namespace(),
            version: default_edge_version(),
            max_memory_bytes: default_edge_memory(),
            ttl_secs: default_edge_ttl(),
            disk_dir: None,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            origin_patterns: default_origin_patterns(),
            allowed_headers: default_allowed_headers(),
        }
    }
}

// Default value functions for serde
fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_true() -> bool {
    true
}

fn default_backend() -> BucketBackend {
    BucketBackend::Fs
}

fn default_bucket_timeout() -> u64 {
    30
}

fn default_resolved_cache_capacity() -> usize {
    crate::archive::DEFAULT_CAPACITY
}

fn default_edge_namespace() -> String {
    "tile-responses".to_string()
}

fn default_edge_version() -> String {
    "v1".to_string()
}

fn default_edge_memory() -> usize {
    64 * 1024 * 1024 // 64MB
}

fn default_edge_ttl() -> u64 {
    86400 // 1 day
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "https://isp.nexus".to_string(),
        "https://www.isp.nexus".to_string(),
    ]
}

fn default_origin_patterns() -> Vec<String> {
    vec![
        r"^https?://localhost(:\d+)?$".to_string(),
        r"^https?://127\.0\.0\.1(:\d+)?$".to_string(),
        r"^https?://10(\.\d{1,3}){3}(:\d+)?$".to_string(),
        r"^https?://192\.168(\.\d{1,3}){2}(:\d+)?$".to_string(),
        r"^https?://[a-z0-9-]+\.local(:\d+)?$".to_string(),
        r"^vscode-webview://".to_string(),
    ]
}

fn default_allowed_headers() -> Vec<String> {
    ["Accept", "Content-Type", "Range", "If-Match", "If-None-Match"]
        .iter()
        .map(|h| h.to_string())
        .collect()
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_address: default_listen_address(),
            public_url: None,
            archive_prefix: String::new(),
            bucket: BucketConfig::default(),
            resolved_cache_capacity: default_resolved_cache_capacity(),
            edge_cache: EdgeCacheConfig::default(),
            cors: CorsConfig::default(),
            enable_metrics: default_true(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file
    ///
    /// # Returns
    /// * `Ok(ServerConfig)` if loading and validation succeed
    /// * `Err(TileError)` if file cannot be read or config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            TileError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: ServerConfig = serde_yaml::from_str(content).map_err(|e| {
            TileError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - listen_address must be a socket address
    /// - public_url, when set, must be an http(s) URL
    /// - resolved_cache_capacity must be > 0
    /// - the bucket backend must have its endpoint or root set
    /// - the edge cache namespace and version must not be empty
    /// - every CORS origin pattern must be a valid regular expression
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;

        if let Some(url) = &self.public_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(TileError::ConfigError(format!(
                    "public_url must start with http:// or https://, got {}",
                    url
                )));
            }
        }

        if self.resolved_cache_capacity == 0 {
            return Err(TileError::ConfigError(
                "resolved_cache_capacity must be greater than 0".to_string(),
            ));
        }

        match self.bucket.backend {
            BucketBackend::Http if self.bucket.endpoint.is_none() => {
                return Err(TileError::ConfigError(
                    "bucket.endpoint is required for the http backend".to_string(),
                ));
            }
            BucketBackend::Fs if self.bucket.root.is_none() => {
                return Err(TileError::ConfigError(
                    "bucket.root is required for the fs backend".to_string(),
                ));
            }
            _ => {}
        }

        if self.edge_cache.namespace.is_empty() || self.edge_cache.version.is_empty() {
            return Err(TileError::ConfigError(
                "edge_cache namespace and version must not be empty".to_string(),
            ));
        }

        for pattern in &self.cors.origin_patterns {
            Regex::new(pattern).map_err(|e| {
                TileError::ConfigError(format!("invalid CORS origin pattern '{}': {}", pattern, e))
            })?;
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.listen_address.parse().map_err(|e| {
            TileError::ConfigError(format!(
                "invalid listen_address '{}': {}",
                self.listen_address, e
            ))
        })
    }
}

impl BucketConfig {
    /// Construct the configured bucket binding
    pub fn build(&self) -> Result<Arc<dyn Bucket>> {
        match self.backend {
            BucketBackend::Http => {
                let endpoint = self.endpoint.as_deref().ok_or_else(|| {
                    TileError::ConfigError("bucket.endpoint is required".to_string())
                })?;
                Ok(Arc::new(HttpBucket::with_timeout(
                    endpoint,
                    Duration::from_secs(self.timeout_secs),
                )?))
            }
            BucketBackend::Fs => {
                let root = self
                    .root
                    .as_deref()
                    .ok_or_else(|| TileError::ConfigError("bucket.root is required".to_string()))?;
                Ok(Arc::new(FsBucket::new(root)))
            }
            BucketBackend::Memory => Ok(Arc::new(MemoryBucket::new())),
        }
    }
}
