//! Prometheus metrics for the tile server
//!
//! Metrics live in a registry owned by [`ServerMetrics`] rather than the
//! process-global default, so several servers (and tests) can coexist.

use crate::archive::ResolvedCacheStats;
use crate::edge_cache::EdgeCacheStats;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::time::Duration;

/// Metrics collected by the request path
#[derive(Clone)]
pub struct ServerMetrics {
    registry: Registry,

    /// Requests by route and response status
    requests_total: IntCounterVec,

    /// Time spent producing a response, by route
    request_duration_seconds: HistogramVec,

    /// Edge cache lookups by result (hit/miss)
    edge_cache_lookups_total: IntCounterVec,

    /// Response body bytes sent to clients
    bytes_served_total: IntCounter,

    /// Resolved-value cache snapshot, refreshed on every scrape
    resolved_cache: IntGaugeVec,

    /// Edge cache memory footprint, refreshed on every scrape
    edge_cache_bytes: IntGauge,
}

impl ServerMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Create metrics registered with the given registry
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let requests_total = IntCounterVec::new(
            Opts::new("pmtiles_requests_total", "Total number of requests handled"),
            &["route", "status"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "pmtiles_request_duration_seconds",
                "Time to produce a response in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
            &["route"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let edge_cache_lookups_total = IntCounterVec::new(
            Opts::new(
                "pmtiles_edge_cache_lookups_total",
                "Edge response cache lookups by result",
            ),
            &["result"],
        )?;
        registry.register(Box::new(edge_cache_lookups_total.clone()))?;

        let bytes_served_total = IntCounter::new(
            "pmtiles_bytes_served_total",
            "Total response body bytes sent to clients",
        )?;
        registry.register(Box::new(bytes_served_total.clone()))?;

        let resolved_cache = IntGaugeVec::new(
            Opts::new(
                "pmtiles_resolved_cache",
                "Resolved header/directory/metadata cache statistics",
            ),
            &["stat"], // stat: entries, capacity, hits, misses
        )?;
        registry.register(Box::new(resolved_cache.clone()))?;

        let edge_cache_bytes = IntGauge::new(
            "pmtiles_edge_cache_memory_bytes",
            "Bytes held by the in-memory edge cache tier",
        )?;
        registry.register(Box::new(edge_cache_bytes.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration_seconds,
            edge_cache_lookups_total,
            bytes_served_total,
            resolved_cache,
            edge_cache_bytes,
        })
    }

    /// Record a finished request
    pub fn record_request(&self, route: &str, status: u16, body_bytes: usize, elapsed: Duration) {
        self.requests_total
            .with_label_values(&[route, &status.to_string()])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[route])
            .observe(elapsed.as_secs_f64());
        self.bytes_served_total.inc_by(body_bytes as u64);
    }

    pub fn record_edge_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.edge_cache_lookups_total
            .with_label_values(&[result])
            .inc();
    }

    pub fn requests(&self, route: &str, status: u16) -> u64 {
        self.requests_total
            .with_label_values(&[route, &status.to_string()])
            .get()
    }

    pub fn edge_lookups(&self, hit: bool) -> u64 {
        let result = if hit { "hit" } else { "miss" };
        self.edge_cache_lookups_total.with_label_values(&[result]).get()
    }

    /// Copy cache statistics into their gauges
    pub fn observe_caches(&self, resolved: &ResolvedCacheStats, edge: Option<&EdgeCacheStats>) {
        let set = |stat: &str, value: u64| {
            self.resolved_cache
                .with_label_values(&[stat])
                .set(i64::try_from(value).unwrap_or(i64::MAX));
        };
        set("entries", resolved.entries as u64);
        set("capacity", resolved.capacity as u64);
        set("hits", resolved.hits);
        set("misses", resolved.misses);

        if let Some(edge) = edge {
            self.edge_cache_bytes
                .set(i64::try_from(edge.l1_bytes).unwrap_or(i64::MAX));
        }
    }

    /// Render every metric in the Prometheus text format
    pub fn render(&self) -> Result<(Vec<u8>, String), prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok((buffer, encoder.format_type().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_render() {
        let metrics = ServerMetrics::new().unwrap();
        metrics.record_request("tile", 200, 512, Duration::from_millis(3));
        metrics.record_request("tile", 200, 256, Duration::from_millis(1));
        metrics.record_request("tilejson", 404, 0, Duration::from_millis(1));
        metrics.record_edge_lookup(true);
        metrics.record_edge_lookup(false);
        metrics.record_edge_lookup(false);

        assert_eq!(metrics.requests("tile", 200), 2);
        assert_eq!(metrics.requests("tilejson", 404), 1);
        assert_eq!(metrics.edge_lookups(true), 1);
        assert_eq!(metrics.edge_lookups(false), 2);

        let (body, content_type) = metrics.render().unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(content_type.starts_with("text/plain"));
        assert!(text.contains("pmtiles_requests_total{route=\"tile\",status=\"200\"} 2"));
        assert!(text.contains("pmtiles_bytes_served_total 768"));
    }

    #[test]
    fn test_observe_caches() {
        let metrics = ServerMetrics::new().unwrap();
        let resolved = ResolvedCacheStats {
            entries: 3,
            capacity: 25,
            hits: 10,
            misses: 4,
        };
        metrics.observe_caches(&resolved, None);

        let (body, _) = metrics.render().unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("pmtiles_resolved_cache{stat=\"capacity\"} 25"));
        assert!(text.contains("pmtiles_resolved_cache{stat=\"hits\"} 10"));
    }

    #[test]
    fn test_independent_registries() {
        assert!(ServerMetrics::new().is_ok());
        assert!(ServerMetrics::new().is_ok());
    }
}
