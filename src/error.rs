//! Error types for the tile server
//!
//! Every failure, wherever it is raised, is normalized into a [`TileError`]
//! that knows its HTTP status, a colon-delimited machine-readable name and a
//! human message. The outermost handler serializes that triple as the JSON
//! error body via [`TileError::to_body`].

use crate::models::{Compression, TileType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for tile server operations
pub type Result<T> = std::result::Result<T, TileError>;

/// Message returned for uncategorized failures instead of internal detail
pub const UNEXPECTED_ERROR_MESSAGE: &str = "An unexpected error occurred";

/// Error types that can occur while serving tiles
#[derive(Error, Debug, Clone)]
pub enum TileError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Missing path parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid path parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid Range header: {0}")]
    InvalidRange(String),

    #[error("Unsatisfiable range: {0}")]
    UnsatisfiableRange(String),

    #[error("Requested tile type {requested:?} does not match archive tile type {actual:?}")]
    TileTypeMismatch { requested: TileType, actual: TileType },

    #[error("Zoom {zoom} is below the archive minimum zoom {min_zoom}")]
    ZoomBelowMinimum { zoom: u8, min_zoom: u8 },

    #[error("Zoom {zoom} is above the archive maximum zoom {max_zoom}")]
    ZoomAboveMaximum { zoom: u8, max_zoom: u8 },

    #[error("No route matches {0}")]
    RouteNotFound(String),

    #[error("Archive not found: {0}")]
    ArchiveNotFound(String),

    #[error("Required upstream context unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("ETag mismatch for {key}: expected {expected}, found {actual}")]
    EtagMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("Read of {0} was cancelled")]
    Cancelled(String),

    #[error("Object {0} exists but returned no body")]
    EmptyBody(String),

    #[error("Unsupported compression: {0:?}")]
    UnsupportedCompression(Compression),

    #[error("Decompression failed: {0}")]
    DecompressionError(String),

    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Upstream HTTP error: {0}")]
    HttpError(String),

    #[error("Object store unreachable: {0}")]
    StoreUnavailable(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for TileError {
    fn from(err: std::io::Error) -> Self {
        TileError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for TileError {
    fn from(err: serde_json::Error) -> Self {
        TileError::InvalidArchive(format!("metadata is not valid JSON: {}", err))
    }
}

/// JSON error body returned to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub name: String,
    pub status: u16,
    pub message: String,
}

impl TileError {
    /// Convert error to HTTP status code
    ///
    /// - Validation failures (bad parameters, malformed Range, tile type
    ///   mismatch, zoom below minimum): 400
    /// - Missing objects, unmatched routes, zoom above maximum: 404
    /// - Range past the end of the body: 416
    /// - Missing upstream context on a non-core route: 424
    /// - Everything else, including an unreachable object store: 500
    pub fn to_http_status(&self) -> u16 {
        match self {
            TileError::MissingParameter(_) => 400,
            TileError::InvalidParameter(_) => 400,
            TileError::InvalidRange(_) => 400,
            TileError::TileTypeMismatch { .. } => 400,
            TileError::ZoomBelowMinimum { .. } => 400,

            // Above the maximum the tile simply does not exist
            TileError::ZoomAboveMaximum { .. } => 404,
            TileError::RouteNotFound(_) => 404,
            TileError::ArchiveNotFound(_) => 404,

            TileError::UnsatisfiableRange(_) => 416,

            TileError::DependencyUnavailable(_) => 424,

            TileError::ConfigError(_) => 500,
            TileError::EtagMismatch { .. } => 500,
            TileError::Cancelled(_) => 500,
            TileError::EmptyBody(_) => 500,
            TileError::UnsupportedCompression(_) => 500,
            TileError::DecompressionError(_) => 500,
            TileError::InvalidArchive(_) => 500,
            TileError::CacheError(_) => 500,
            TileError::IoError(_) => 500,
            TileError::HttpError(_) => 500,
            TileError::StoreUnavailable(_) => 500,
            TileError::InternalError(_) => 500,
        }
    }

    /// Colon-delimited machine-readable identifier for this error
    pub fn name(&self) -> &'static str {
        match self {
            TileError::ConfigError(_) => "config:invalid",
            TileError::MissingParameter(_) => "request:missing-parameter",
            TileError::InvalidParameter(_) => "request:invalid-parameter",
            TileError::InvalidRange(_) => "request:invalid-range",
            TileError::UnsatisfiableRange(_) => "request:range-not-satisfiable",
            TileError::TileTypeMismatch { .. } => "tile:type-mismatch",
            TileError::ZoomBelowMinimum { .. } => "tile:zoom-below-minimum",
            TileError::ZoomAboveMaximum { .. } => "tile:zoom-above-maximum",
            TileError::RouteNotFound(_) => "route:not-found",
            TileError::ArchiveNotFound(_) => "archive:not-found",
            TileError::DependencyUnavailable(_) => "dependency:unavailable",
            TileError::EtagMismatch { .. } => "archive:etag-mismatch",
            TileError::Cancelled(_) => "request:cancelled",
            TileError::EmptyBody(_) => "archive:empty-body",
            TileError::UnsupportedCompression(_) => "archive:unsupported-compression",
            TileError::DecompressionError(_) => "archive:decompression-failed",
            TileError::InvalidArchive(_) => "archive:invalid",
            TileError::CacheError(_) => "cache:error",
            TileError::IoError(_) => "internal:io",
            TileError::HttpError(_) => "internal:upstream",
            TileError::StoreUnavailable(_) => "internal:store-unavailable",
            TileError::InternalError(_) => "internal:unexpected",
        }
    }

    /// Human readable message for the error body
    ///
    /// 5xx errors report a fixed message; only an unsupported codec is named.
    pub fn public_message(&self) -> String {
        match self {
            TileError::UnsupportedCompression(_) => self.to_string(),
            other if other.to_http_status() >= 500 => UNEXPECTED_ERROR_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }

    /// Build the structured error body for this error
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            name: self.name().to_string(),
            status: self.to_http_status(),
            message: self.public_message(),
        }
    }

    /// True when the error means "does not exist" rather than "broken"
    pub fn is_not_found(&self) -> bool {
        self.to_http_status() == 404
    }
}
