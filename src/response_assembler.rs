//! Builds HTTP responses for tiles, TileJSON documents and errors

use crate::archive::{TileJson, TilePayload};
use crate::error::{Result, TileError};
use crate::models::RangeRequest;
use bytes::Bytes;
use http::header::{
    ACCEPT_RANGES, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, ETAG, EXPIRES,
};
use http::{HeaderMap, HeaderValue, Response, StatusCode};
use tracing::debug;

/// Cache-Control applied when the archive object carries none
pub const DEFAULT_CACHE_CONTROL: &str = "public, max-age=86400";

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| TileError::InternalError(format!("Invalid header value '{}': {}", value, e)))
}

fn build(status: StatusCode, headers: HeaderMap, body: Bytes) -> Response<Bytes> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Stateless response builders
pub struct ResponseAssembler;

impl ResponseAssembler {
    /// 200 with the decompressed tile and its archive's caching headers
    pub fn tile(payload: &TilePayload) -> Result<Response<Bytes>> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(payload.content_type));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(payload.data.len()));
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));

        if let Some(etag) = &payload.etag {
            headers.insert(ETAG, header_value(etag)?);
        }
        let cache_control = payload
            .cache_control
            .as_deref()
            .unwrap_or(DEFAULT_CACHE_CONTROL);
        headers.insert(CACHE_CONTROL, header_value(cache_control)?);
        if let Some(expires) = &payload.expires {
            headers.insert(EXPIRES, header_value(expires)?);
        }

        Ok(build(StatusCode::OK, headers, payload.data.clone()))
    }

    /// 204 for a coordinate the archive holds no tile for
    pub fn no_tile() -> Response<Bytes> {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static(DEFAULT_CACHE_CONTROL));
        build(StatusCode::NO_CONTENT, headers, Bytes::new())
    }

    /// 200 with the TileJSON document
    pub fn tilejson(document: &TileJson) -> Result<Response<Bytes>> {
        let body = serde_json::to_vec(document)
            .map_err(|e| TileError::InternalError(format!("Failed to encode TileJSON: {}", e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static(DEFAULT_CACHE_CONTROL));

        Ok(build(StatusCode::OK, headers, Bytes::from(body)))
    }

    /// JSON `{name, status, message}` body with the matching status
    pub fn error(err: &TileError) -> Response<Bytes> {
        let body = err.to_body();
        let status =
            StatusCode::from_u16(body.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let encoded = serde_json::to_vec(&body).unwrap_or_default();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(encoded.len()));
        build(status, headers, Bytes::from(encoded))
    }

    /// Plain-text 404 for a path no route matched
    pub fn route_not_found(path: &str) -> Response<Bytes> {
        let body = format!("Not found: {}", path);
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        build(StatusCode::NOT_FOUND, headers, Bytes::from(body))
    }

    /// Prometheus text exposition
    pub fn metrics(body: Vec<u8>, content_type: &str) -> Result<Response<Bytes>> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, header_value(content_type)?);
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        Ok(build(StatusCode::OK, headers, Bytes::from(body)))
    }

    /// Narrow a full 200 response to a client byte range
    ///
    /// Returns 206 with `Content-Range` when the range starts inside the
    /// body (the end is clamped to the last byte), 416 when it starts past
    /// the end. Non-200 responses pass through untouched.
    pub fn apply_range(response: Response<Bytes>, range: Option<RangeRequest>) -> Response<Bytes> {
        let range = match range {
            Some(range) if response.status() == StatusCode::OK => range,
            _ => return response,
        };

        let total = response.body().len() as u64;
        if range.offset >= total {
            debug!("Range {:?} starts past body of {} bytes", range, total);
            let err = TileError::UnsatisfiableRange(format!(
                "range starts at {} but the body is {} bytes",
                range.offset, total
            ));
            let mut unsatisfiable = Self::error(&err);
            if let Ok(value) = header_value(&format!("bytes */{}", total)) {
                unsatisfiable.headers_mut().insert(CONTENT_RANGE, value);
            }
            return unsatisfiable;
        }

        let end = range.end().min(total - 1);
        let (parts, body) = response.into_parts();
        let slice = body.slice(range.offset as usize..=end as usize);

        let mut partial = Response::from_parts(parts, slice);
        *partial.status_mut() = StatusCode::PARTIAL_CONTENT;
        let headers = partial.headers_mut();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(end - range.offset + 1));
        if let Ok(value) = header_value(&format!("bytes {}-{}/{}", range.offset, end, total)) {
            headers.insert(CONTENT_RANGE, value);
        }
        partial
    }

    /// Drop the body of a response to a HEAD request, keeping its headers
    pub fn without_body(response: Response<Bytes>) -> Response<Bytes> {
        let (parts, _) = response.into_parts();
        Response::from_parts(parts, Bytes::new())
    }
}
