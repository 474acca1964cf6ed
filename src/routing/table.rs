//! Backend route table.
//!
//! # Responsibilities
//! - Compile `ServiceConfig`s into immutable `BackendRoute`s
//! - Look up a route by logical service name
//! - Build outbound targets (unary URL, pass-through URI, tunnel URL)
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(1) lookup via HashMap
//! - Explicit `None` on unknown service rather than a silent default

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::Uri;
use url::Url;

use crate::config::ServiceConfig;

/// Errors raised while compiling or using routes.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("service '{service}': invalid URL '{url}': {source}")]
    InvalidUrl {
        service: String,
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("service '{0}': WebSocket URL must use ws or wss")]
    TunnelScheme(String),
    #[error("path segment '.' or '..' not allowed in '{0}'")]
    DotSegment(String),
    #[error("invalid pass-through target: {0}")]
    PassThroughTarget(#[from] axum::http::uri::InvalidUri),
}

/// Static mapping from a logical service to its unary and WebSocket URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRoute {
    name: String,
    api_url: Url,
    ws_url: Url,
    /// `http(s)://host[:port]` derived from `ws_url`, used by the pass-through path.
    http_origin: String,
}

impl BackendRoute {
    pub fn from_config(config: &ServiceConfig) -> Result<Self, RouteError> {
        let parse = |raw: &str| {
            Url::parse(raw).map_err(|source| RouteError::InvalidUrl {
                service: config.name.clone(),
                url: raw.to_string(),
                source,
            })
        };
        let api_url = parse(&config.api_url)?;
        let ws_url = parse(&config.ws_url)?;

        let scheme = match ws_url.scheme() {
            "ws" => "http",
            "wss" => "https",
            _ => return Err(RouteError::TunnelScheme(config.name.clone())),
        };
        let host = ws_url
            .host_str()
            .ok_or_else(|| RouteError::TunnelScheme(config.name.clone()))?;
        let http_origin = match ws_url.port() {
            Some(port) => format!("{scheme}://{host}:{port}"),
            None => format!("{scheme}://{host}"),
        };

        Ok(Self {
            name: config.name.clone(),
            api_url,
            ws_url,
            http_origin,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    pub fn ws_url(&self) -> &Url {
        &self.ws_url
    }

    /// Target URL for a unary call: `api_url`, optionally followed by
    /// `/{rest}` and the inbound query string.
    ///
    /// `rest` must be the raw, still percent-encoded path suffix. Encoded
    /// delimiters stay encoded so they cannot introduce a query or new path
    /// segments, and `.`/`..` segments are refused.
    pub fn unary_url(&self, rest: Option<&str>, query: Option<&str>) -> Result<Url, RouteError> {
        let mut target = self.api_url.clone();
        if let Some(rest) = rest.map(|r| r.trim_start_matches('/')).filter(|r| !r.is_empty()) {
            if rest.split('/').any(is_dot_segment) {
                return Err(RouteError::DotSegment(rest.to_string()));
            }
            let path = format!("{}/{}", target.path().trim_end_matches('/'), rest);
            target.set_path(&path);
        }
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            target.set_query(Some(query));
        }
        Ok(target)
    }

    /// Target URI for the pass-through path: the backend's HTTP origin with
    /// the inbound path and query kept verbatim.
    pub fn pass_through_uri(&self, path_and_query: &str) -> Result<Uri, RouteError> {
        Ok(format!("{}{}", self.http_origin, path_and_query).parse()?)
    }
}

/// `.` or `..`, including their percent-encoded spellings, which URL
/// parsers resolve exactly like the literal ones.
fn is_dot_segment(segment: &str) -> bool {
    let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
    decoded == "." || decoded == ".."
}

/// All backend routes, keyed by service name.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: HashMap<String, Arc<BackendRoute>>,
}

impl RouteTable {
    /// Compile the route table. Later entries with a duplicate name win,
    /// though validation rejects duplicates before this point.
    pub fn from_config(services: &[ServiceConfig]) -> Result<Self, RouteError> {
        let mut routes = HashMap::with_capacity(services.len());
        for service in services {
            let route = BackendRoute::from_config(service)?;
            tracing::debug!(
                service = %route.name,
                api_url = %route.api_url,
                ws_url = %route.ws_url,
                "Route compiled"
            );
            routes.insert(route.name.clone(), Arc::new(route));
        }
        Ok(Self { routes })
    }

    pub fn get(&self, service: &str) -> Option<Arc<BackendRoute>> {
        self.routes.get(service).cloned()
    }

    /// Service names in sorted order.
    pub fn service_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
