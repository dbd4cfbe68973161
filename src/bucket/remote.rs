//! HTTP object-store bucket

use super::{Bucket, BucketObject, GetOptions, HttpMetadata};
use crate::error::{Result, TileError};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

/// Bucket backed by an S3/R2-compatible HTTP endpoint
///
/// Objects are addressed as `{endpoint}/{key}`. Byte ranges are sent as
/// `Range` headers and ETag conditions as `If-Match`; a `412 Precondition
/// Failed` answer becomes a metadata-only [`BucketObject`].
pub struct HttpBucket {
    client: Client,
    endpoint: String,
}

impl HttpBucket {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        Self::with_timeout(endpoint, Duration::from_secs(30))
    }

    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| TileError::HttpError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(HttpBucket {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.endpoint, key.trim_start_matches('/'))
    }

    fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    }

    /// Total object size from `Content-Range: bytes a-b/total`, falling back
    /// to `Content-Length`
    fn object_size(headers: &HeaderMap) -> u64 {
        headers
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit_once('/'))
            .and_then(|(_, total)| total.trim().parse::<u64>().ok())
            .or_else(|| {
                headers
                    .get("content-length")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
            })
            .unwrap_or(0)
    }

    fn http_metadata(headers: &HeaderMap) -> HttpMetadata {
        HttpMetadata {
            content_type: Self::header_string(headers, "content-type"),
            cache_control: Self::header_string(headers, "cache-control"),
            cache_expiry: Self::header_string(headers, "expires"),
        }
    }
}

#[async_trait]
impl Bucket for HttpBucket {
    async fn get(&self, key: &str, options: GetOptions) -> Result<Option<BucketObject>> {
        let url = self.object_url(key);
        let mut request = self.client.get(&url);

        if let Some(range) = options.range {
            if range.length == 0 {
                return Err(TileError::InvalidRange(format!(
                    "zero-length range requested for {}",
                    key
                )));
            }
            request = request.header(
                "Range",
                format!("bytes={}-{}", range.offset, range.offset + range.length - 1),
            );
        }
        if let Some(etag) = &options.etag_matches {
            request = request.header("If-Match", etag.as_str());
        }

        let response = request.send().await.map_err(|e| {
            warn!("GET request failed for url={}: {}", url, e);
            if e.is_connect() || e.is_timeout() {
                TileError::StoreUnavailable(format!("{}: {}", url, e))
            } else {
                TileError::HttpError(format!("GET {} failed: {}", url, e))
            }
        })?;

        let status = response.status();
        debug!("Received response for url={}, status={}", url, status);

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let headers = response.headers().clone();
        let etag = Self::header_string(&headers, "etag").unwrap_or_default();

        if status == StatusCode::PRECONDITION_FAILED {
            return Ok(Some(BucketObject {
                key: key.to_string(),
                etag,
                size: Self::object_size(&headers),
                http_metadata: Self::http_metadata(&headers),
                body: None,
            }));
        }

        // An unsatisfiable range means the window starts past the end
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(Some(BucketObject {
                key: key.to_string(),
                etag,
                size: Self::object_size(&headers),
                http_metadata: Self::http_metadata(&headers),
                body: Some(bytes::Bytes::new()),
            }));
        }

        if !status.is_success() {
            warn!("Unexpected status code for url={}: status={}", url, status);
            return Err(TileError::HttpError(format!(
                "GET {} returned {}",
                url, status
            )));
        }

        let size = Self::object_size(&headers);
        let http_metadata = Self::http_metadata(&headers);
        let mut body = response
            .bytes()
            .await
            .map_err(|e| TileError::HttpError(format!("Failed to read response body: {}", e)))?;

        // Servers that ignore Range answer 200 with the whole object
        if status == StatusCode::OK {
            if let Some(range) = options.range {
                let start = (range.offset as usize).min(body.len());
                let end = (range.offset.saturating_add(range.length) as usize).min(body.len());
                body = body.slice(start..end);
            }
        }

        Ok(Some(BucketObject {
            key: key.to_string(),
            etag,
            size,
            http_metadata,
            body: Some(body),
        }))
    }
}
