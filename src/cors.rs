//! Cross-origin response decoration

use crate::config::CorsConfig;
use crate::error::{Result, TileError};
use http::header::{
    HeaderMap, HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_EXPOSE_HEADERS, VARY,
};
use regex::Regex;

/// Origin allow-list plus pattern rules
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allowed_origins: Vec<String>,
    patterns: Vec<Regex>,
    allowed_headers: HeaderValue,
}

impl CorsPolicy {
    pub fn from_config(config: &CorsConfig) -> Result<Self> {
        let patterns = config
            .origin_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    TileError::ConfigError(format!("invalid CORS origin pattern '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let allowed_headers = HeaderValue::from_str(&config.allowed_headers.join(", "))
            .map_err(|e| TileError::ConfigError(format!("invalid allowed header list: {}", e)))?;

        Ok(CorsPolicy {
            allowed_origins: config.allowed_origins.clone(),
            patterns,
            allowed_headers,
        })
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|o| o == origin)
            || self.patterns.iter().any(|p| p.is_match(origin))
    }

    /// Add CORS headers for a request carrying `origin`
    ///
    /// An allowed origin is echoed back; the remaining headers are set on
    /// every response regardless of origin.
    pub fn apply(&self, origin: Option<&str>, headers: &mut HeaderMap) {
        headers.remove(ACCESS_CONTROL_ALLOW_ORIGIN);

        if let Some(origin) = origin.filter(|o| self.is_allowed(o)) {
            if let Ok(value) = HeaderValue::from_str(origin) {
                headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
            }
        }

        headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, self.allowed_headers.clone());
        headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, HeaderValue::from_static("*"));
        headers.insert(VARY, HeaderValue::from_static("Origin"));
    }
}
