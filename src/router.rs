//! Ordered request routing
//!
//! Routes are tried in registration order. A route whose method list does
//! not contain the request method is skipped, as is one whose pattern does
//! not match; the first remaining route wins. Pattern segments use
//! `:name` placeholders, matched against the raw path and percent-decoded
//! afterwards, so an encoded `%2F` stays inside a single parameter.

use crate::error::{Result, TileError};
use http::Method;
use percent_encoding::percent_decode_str;
use regex::Regex;
use std::collections::HashMap;

/// Parameter carrying the archive identifier
pub const TILE_SET_PARAM: &str = "tileSetName";

/// What a matched route does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    Metrics,
    Tile,
    TileJson,
}

impl Handler {
    pub fn as_str(&self) -> &'static str {
        match self {
            Handler::Metrics => "metrics",
            Handler::Tile => "tile",
            Handler::TileJson => "tilejson",
        }
    }
}

/// One routing rule
#[derive(Debug, Clone)]
pub struct Route {
    pattern: String,
    regex: Regex,
    param_names: Vec<String>,
    methods: Vec<Method>,
    handler: Handler,
    rewrite: Option<String>,
    cacheable: bool,
}

impl Route {
    /// Compile a `:param` path pattern
    pub fn new(pattern: &str, methods: &[Method], handler: Handler) -> Result<Self> {
        let token = Regex::new(r":([A-Za-z][A-Za-z0-9_]*)")
            .map_err(|e| TileError::InternalError(e.to_string()))?;

        let mut expression = String::from("^");
        let mut param_names = Vec::new();
        let mut last = 0;
        for caps in token.captures_iter(pattern) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            expression.push_str(&regex::escape(&pattern[last..whole.start()]));
            expression.push_str(&format!("(?P<{}>[^/]+?)", name.as_str()));
            param_names.push(name.as_str().to_string());
            last = whole.end();
        }
        expression.push_str(&regex::escape(&pattern[last..]));
        expression.push('$');

        let regex = Regex::new(&expression).map_err(|e| {
            TileError::ConfigError(format!("invalid route pattern '{}': {}", pattern, e))
        })?;

        Ok(Route {
            pattern: pattern.to_string(),
            regex,
            param_names,
            methods: methods.to_vec(),
            handler,
            rewrite: None,
            cacheable: handler != Handler::Metrics,
        })
    }

    /// Rewrite `tileSetName` from a template such as `tiger/{stateCode}/{tileSetName}`
    pub fn with_rewrite(mut self, template: &str) -> Self {
        self.rewrite = Some(template.to_string());
        self
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn handler(&self) -> Handler {
        self.handler
    }

    /// Whether responses of this route go through the edge cache
    pub fn cacheable(&self) -> bool {
        self.cacheable
    }

    fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let caps = self.regex.captures(path)?;
        let mut params = HashMap::with_capacity(self.param_names.len());
        for name in &self.param_names {
            if let Some(raw) = caps.name(name) {
                let decoded = percent_decode_str(raw.as_str()).decode_utf8_lossy();
                params.insert(name.clone(), decoded.into_owned());
            }
        }

        if let Some(template) = &self.rewrite {
            let mut rewritten = template.clone();
            for (name, value) in &params {
                rewritten = rewritten.replace(&format!("{{{}}}", name), value);
            }
            params.insert(TILE_SET_PARAM.to_string(), rewritten);
        }

        Some(params)
    }
}

/// Result of routing a request
#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub route: &'a Route,
    pub params: HashMap<String, String>,
}

impl RouteMatch<'_> {
    pub fn param(&self, name: &str) -> Result<&str> {
        self.params
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| TileError::MissingParameter(name.to_string()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Router { routes: Vec::new() }
    }

    /// The tile server's route table
    ///
    /// Namespaced routes come first so `/tiger/...` never falls through to
    /// the generic single-segment tile route.
    pub fn tile_routes(enable_metrics: bool) -> Result<Self> {
        let read = [Method::GET, Method::HEAD];
        let mut router = Router::new();

        if enable_metrics {
            router.add(Route::new("/metrics", &[Method::GET], Handler::Metrics)?);
        }
        router
            .add(
                Route::new("/tiger/:stateCode/:tileSetName/:z/:x/:y.:ext", &read, Handler::Tile)?
                    .with_rewrite("tiger/{stateCode}/{tileSetName}"),
            )
            .add(
                Route::new("/tiger/:stateCode/:tileSetName.json", &read, Handler::TileJson)?
                    .with_rewrite("tiger/{stateCode}/{tileSetName}"),
            )
            .add(
                Route::new(
                    "/providers/:providerID/:stateCode/:tileSetName/:z/:x/:y.:ext",
                    &read,
                    Handler::Tile,
                )?
                .with_rewrite("providers/{providerID}/{stateCode}/{tileSetName}"),
            )
            .add(
                Route::new(
                    "/providers/:providerID/:stateCode/:tileSetName.json",
                    &read,
                    Handler::TileJson,
                )?
                .with_rewrite("providers/{providerID}/{stateCode}/{tileSetName}"),
            )
            .add(Route::new("/:tileSetName/:z/:x/:y.:ext", &read, Handler::Tile)?)
            .add(Route::new("/:tileSetName.json", &read, Handler::TileJson)?);

        Ok(router)
    }

    pub fn add(&mut self, route: Route) -> &mut Self {
        self.routes.push(route);
        self
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// First route accepting `method` whose pattern matches `path`
    pub fn route(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        self.routes
            .iter()
            .filter(|route| route.methods.contains(method))
            .find_map(|route| route.matches(path).map(|params| RouteMatch { route, params }))
    }
}
