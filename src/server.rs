//! HTTP tile server
//!
//! [`TileServer::handle`] is the full request path:
//! route, edge cache lookup, handler, CORS, client range, HEAD.
//! [`TileServer::serve`] runs it behind a hyper HTTP/1 accept loop.

use crate::archive::{ArchiveReader, ResolvedCache};
use crate::bucket::Bucket;
use crate::config::ServerConfig;
use crate::cors::CorsPolicy;
use crate::decompress::DefaultDecompressor;
use crate::edge_cache::{CachedResponse, EdgeCache};
use crate::error::{Result, TileError};
use crate::metrics::ServerMetrics;
use crate::models::{RangeRequest, TileCoord, TileType};
use crate::response_assembler::ResponseAssembler;
use crate::router::{Handler, RouteMatch, Router, TILE_SET_PARAM};
use crate::source::BucketSource;
use bytes::Bytes;
use http::header::{HOST, ORIGIN, RANGE};
use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Route label for requests no route matched
const UNMATCHED_ROUTE: &str = "unmatched";

pub struct TileServer {
    bucket: Arc<dyn Bucket>,
    archive_prefix: String,
    public_url: Option<String>,
    resolved: Arc<ResolvedCache>,
    edge: Option<Arc<EdgeCache>>,
    router: Router,
    cors: CorsPolicy,
    metrics: ServerMetrics,
}

impl TileServer {
    /// Build a server with the bucket named in `config`
    pub async fn from_config(config: &ServerConfig) -> Result<Self> {
        let bucket = config.bucket.build()?;
        Self::with_bucket(config, bucket).await
    }

    /// Build a server over an already constructed bucket binding
    pub async fn with_bucket(config: &ServerConfig, bucket: Arc<dyn Bucket>) -> Result<Self> {
        let resolved = Arc::new(ResolvedCache::new(
            config.resolved_cache_capacity,
            Arc::new(DefaultDecompressor::new()),
        ));

        let edge = if config.edge_cache.enabled {
            Some(Arc::new(EdgeCache::new(&config.edge_cache).await?))
        } else {
            None
        };

        let metrics = ServerMetrics::new()
            .map_err(|e| TileError::ConfigError(format!("Failed to register metrics: {}", e)))?;

        Ok(TileServer {
            bucket,
            archive_prefix: config.archive_prefix.clone(),
            public_url: config
                .public_url
                .as_ref()
                .map(|url| url.trim_end_matches('/').to_string()),
            resolved,
            edge,
            router: Router::tile_routes(config.enable_metrics)?,
            cors: CorsPolicy::from_config(&config.cors)?,
            metrics,
        })
    }

    pub fn resolved_cache(&self) -> &Arc<ResolvedCache> {
        &self.resolved
    }

    pub fn edge_cache(&self) -> Option<&Arc<EdgeCache>> {
        self.edge.as_ref()
    }

    pub fn metrics(&self) -> &ServerMetrics {
        &self.metrics
    }

    /// Reader for the archive behind a tile set name
    pub fn reader(&self, name: &str) -> ArchiveReader {
        let source = BucketSource::new(self.bucket.clone(), &self.archive_prefix, name);
        ArchiveReader::new(Arc::new(source), self.resolved.clone())
    }

    /// Public origin: the configured URL, else derived from the Host header
    fn base_url<B>(&self, req: &Request<B>) -> String {
        if let Some(url) = &self.public_url {
            return url.clone();
        }
        let host = req
            .headers()
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .or_else(|| req.uri().authority().map(|a| a.as_str()))
            .unwrap_or("localhost");
        format!("http://{}", host)
    }

    /// Handle one request end to end
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Bytes> {
        let started = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let origin = req
            .headers()
            .get(ORIGIN)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);

        let Some(matched) = self.router.route(&method, &path) else {
            debug!("No route for {} {}", method, path);
            let mut response = ResponseAssembler::route_not_found(&path);
            self.cors.apply(origin.as_deref(), response.headers_mut());
            self.finish(UNMATCHED_ROUTE, &response, started);
            return response;
        };
        let route_name = matched.route.handler().as_str();

        let mut response = match matched.route.handler() {
            Handler::Metrics => self.metrics_response(),
            Handler::Tile | Handler::TileJson => self.cached_or_assembled(&req, &matched).await,
        };

        if matched.route.handler() != Handler::Metrics && response.status() == StatusCode::OK {
            let range_header = req.headers().get(RANGE).map(|h| h.to_str());
            response = match range_header {
                Some(Err(_)) => ResponseAssembler::error(&TileError::InvalidRange(
                    "Range header is not valid ASCII".to_string(),
                )),
                Some(Ok(value)) => match RangeRequest::parse_header(Some(value)) {
                    Ok(range) => ResponseAssembler::apply_range(response, range),
                    Err(e) => ResponseAssembler::error(&e),
                },
                None => response,
            };
        }

        if method == Method::HEAD {
            response = ResponseAssembler::without_body(response);
        }

        self.cors.apply(origin.as_deref(), response.headers_mut());
        self.finish(route_name, &response, started);
        response
    }

    fn finish(&self, route: &str, response: &Response<Bytes>, started: Instant) {
        let status = response.status().as_u16();
        self.metrics
            .record_request(route, status, response.body().len(), started.elapsed());
        if response.status().is_server_error() {
            warn!("{} request finished with {}", route, status);
        }
    }

    /// Serve from the edge cache, or assemble and schedule storage
    async fn cached_or_assembled<B>(
        &self,
        req: &Request<B>,
        matched: &RouteMatch<'_>,
    ) -> Response<Bytes> {
        let base_url = self.base_url(req);
        let url = format!(
            "{}{}",
            base_url,
            req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
        );

        let edge = self.edge.as_ref().filter(|_| matched.route.cacheable());
        if let Some(edge) = edge {
            if let Some(cached) = edge.get(&url).await {
                self.metrics.record_edge_lookup(true);
                debug!("Edge cache hit for {}", url);
                return cached.to_response();
            }
            self.metrics.record_edge_lookup(false);
        }

        let result = match matched.route.handler() {
            Handler::TileJson => self.tilejson(matched, &base_url).await,
            _ => self.tile(matched).await,
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                if e.to_http_status() >= 500 {
                    error!("Request for {} failed: {}", url, e);
                } else {
                    debug!("Request for {} rejected: {}", url, e);
                }
                return ResponseAssembler::error(&e);
            }
        };

        if let Some(edge) = edge {
            if matches!(response.status(), StatusCode::OK | StatusCode::NO_CONTENT) {
                let edge = edge.clone();
                let cached = CachedResponse::from_response(&response);
                tokio::spawn(async move {
                    edge.put(&url, cached);
                });
            }
        }

        response
    }

    async fn tile(&self, matched: &RouteMatch<'_>) -> Result<Response<Bytes>> {
        let name = matched.param(TILE_SET_PARAM)?;
        let coord = TileCoord::from_params(
            matched.param("z")?,
            matched.param("x")?,
            matched.param("y")?,
        )?;
        let tile_type = TileType::from_extension(matched.param("ext")?);

        match self.reader(name).get_tile(tile_type, coord).await? {
            Some(payload) => ResponseAssembler::tile(&payload),
            None => Ok(ResponseAssembler::no_tile()),
        }
    }

    async fn tilejson(&self, matched: &RouteMatch<'_>, base_url: &str) -> Result<Response<Bytes>> {
        let name = matched.param(TILE_SET_PARAM)?;
        let document = self.reader(name).retrieve_tilejson(name, base_url).await?;
        ResponseAssembler::tilejson(&document)
    }

    fn metrics_response(&self) -> Response<Bytes> {
        let edge_stats = self.edge.as_ref().map(|edge| edge.stats());
        self.metrics
            .observe_caches(&self.resolved.stats(), edge_stats.as_ref());

        let rendered = self
            .metrics
            .render()
            .map_err(|e| TileError::InternalError(format!("Failed to encode metrics: {}", e)))
            .and_then(|(body, content_type)| ResponseAssembler::metrics(body, &content_type));
        rendered.unwrap_or_else(|e| ResponseAssembler::error(&e))
    }

    /// Accept connections until `shutdown` resolves
    pub async fn serve<F>(self: Arc<Self>, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        if let Ok(addr) = listener.local_addr() {
            info!("Tile server listening on http://{}", addr);
        }
        tokio::pin!(shutdown);

        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = &mut shutdown => {
                    info!("Tile server shutting down");
                    break;
                }
            };
            let io = TokioIo::new(stream);
            let server = Arc::clone(&self);

            tokio::task::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let server = Arc::clone(&server);
                    async move {
                        let (parts, _body) = req.into_parts();
                        let response = server.handle(Request::from_parts(parts, ())).await;
                        Ok::<_, Infallible>(response.map(Full::new))
                    }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Error serving connection from {}: {:?}", peer, err);
                }
            });
        }

        if let Some(edge) = &self.edge {
            edge.shutdown();
        }
        Ok(())
    }
}
