//! Plain reverse-proxy pass-through for non-upgrade requests on tunnel routes.
//!
//! Requests are streamed to the backend origin of the service's WebSocket
//! URL with path, query, method, headers and body kept as they arrived
//! (minus hop-by-hop headers). The response is streamed back unchanged.
//! Bodies are never buffered or decoded.

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    body::Body,
    http::{header::HeaderValue, HeaderMap, Request, StatusCode, Version},
    response::Response,
};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::http::response::{strip_hop_by_hop, ErrorBody};
use crate::observability::metrics;
use crate::routing::{BackendRoute, RouteError};

/// HTTP/1.1 client used for pass-through requests.
pub type PassThroughClient = Client<HttpConnector, Body>;

pub fn pass_through_client() -> PassThroughClient {
    Client::builder(TokioExecutor::new()).build(HttpConnector::new())
}

#[derive(Debug, thiserror::Error)]
pub enum PassThroughError {
    #[error(transparent)]
    Target(#[from] RouteError),
    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),
}

/// Forward `request` to `route`'s backend and stream the response back.
pub async fn pass_through(
    client: &PassThroughClient,
    route: &BackendRoute,
    peer: Option<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    match send(client, route, peer, request).await {
        Ok(response) => {
            metrics::record_pass_through(route.name(), response.status().as_u16(), start);
            let (mut parts, body) = response.into_parts();
            strip_hop_by_hop(&mut parts.headers);
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::error!(service = %route.name(), error = %e, "Pass-through failed");
            metrics::record_pass_through(route.name(), StatusCode::BAD_GATEWAY.as_u16(), start);
            ErrorBody::new("Upstream request failed", &e).with_status(StatusCode::BAD_GATEWAY)
        }
    }
}

async fn send(
    client: &PassThroughClient,
    route: &BackendRoute,
    peer: Option<SocketAddr>,
    request: Request<Body>,
) -> Result<Response<Incoming>, PassThroughError> {
    let (mut parts, body) = request.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    parts.uri = route.pass_through_uri(path_and_query)?;
    parts.version = Version::HTTP_11;

    strip_hop_by_hop(&mut parts.headers);
    if let Some(peer) = peer {
        append_forwarded_for(&mut parts.headers, peer);
    }

    tracing::debug!(service = %route.name(), target = %parts.uri, method = %parts.method, "Passing request through");

    Ok(client.request(Request::from_parts(parts, body)).await?)
}

fn append_forwarded_for(headers: &mut HeaderMap, peer: SocketAddr) {
    let ip = peer.ip().to_string();
    let value = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{prior}, {ip}"),
        None => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert("x-forwarded-for", value);
    }
}
