//! WebSocket bridge handling.
//!
//! # Responsibilities
//! - Detect WebSocket upgrade requests
//! - Hand non-upgrade requests to the pass-through path
//! - Complete the upgrade handshake with the client
//! - Dial the backend WebSocket and run the tunnel
//!
//! # Data Flow
//! ```text
//! Inspect ──(no upgrade)──▶ PassThrough
//!    │
//!    └─(upgrade)─▶ Handshake ──▶ Dial ──▶ Relay (2 tasks) ──▶ Teardown
//!                     │           │
//!                     ▼           ▼
//!                  reject      close client
//! ```
//!
//! # Design Decisions
//! - One stateless handshake, parameterized by `HandshakeConfig`
//! - No backend contact until the client handshake has been accepted
//! - Dial failures are not retried; the client just sees the socket close
//! - No error frames are ever sent to the client

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{
        connect_info::ConnectInfo,
        ws::{WebSocket, WebSocketUpgrade},
        FromRequestParts, Path, State,
    },
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::SinkExt;

use crate::config::WebSocketConfig;
use crate::http::passthrough::pass_through;
use crate::http::request::RequestIdExt;
use crate::http::response::{ErrorBody, RouteRejection};
use crate::http::server::AppState;
use crate::observability::metrics::{self, TunnelOutcome};
use crate::routing::BackendRoute;
use crate::tunnel::{dial_backend, Tunnel};

/// Which `Origin` headers may open a tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginPolicy {
    Any,
    AllowList(Vec<String>),
}

impl OriginPolicy {
    pub fn from_origins(origins: &[String]) -> Self {
        if origins.is_empty() || origins.iter().any(|o| o == "*") {
            OriginPolicy::Any
        } else {
            OriginPolicy::AllowList(origins.to_vec())
        }
    }

    /// Requests without an `Origin` header are not browser cross-origin
    /// requests and are always allowed.
    pub fn allows(&self, origin: Option<&HeaderValue>) -> bool {
        match (self, origin) {
            (OriginPolicy::Any, _) | (_, None) => true,
            (OriginPolicy::AllowList(list), Some(origin)) => origin
                .to_str()
                .map(|origin| list.iter().any(|allowed| allowed.eq_ignore_ascii_case(origin)))
                .unwrap_or(false),
        }
    }
}

/// Per-session parameters for the server-side handshake.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    pub max_message_size: usize,
    pub origin_policy: OriginPolicy,
}

impl HandshakeConfig {
    pub fn from_config(config: &WebSocketConfig) -> Self {
        Self {
            read_buffer_size: config.read_buffer_size,
            write_buffer_size: config.write_buffer_size,
            max_message_size: config.max_message_size,
            origin_policy: OriginPolicy::from_origins(&config.allowed_origins),
        }
    }

    fn apply(&self, upgrade: WebSocketUpgrade) -> WebSocketUpgrade {
        upgrade
            .read_buffer_size(self.read_buffer_size)
            .write_buffer_size(self.write_buffer_size)
            .max_message_size(self.max_message_size)
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self::from_config(&WebSocketConfig::default())
    }
}

/// True when `Connection` carries the `upgrade` token and `Upgrade` names
/// `websocket`.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));

    let upgrade_websocket = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    connection_upgrade && upgrade_websocket
}

/// Entry point for `/ws/{service}`.
pub async fn tunnel_handler(
    State(state): State<AppState>,
    Path(service): Path<String>,
    request: Request<Body>,
) -> Response {
    let request_id = request.request_id().to_string();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let Some(route) = state.routes.get(&service) else {
        tracing::warn!(request_id = %request_id, service = %service, "Unknown tunnel service");
        return RouteRejection::UnknownService(service).into_response();
    };

    if !is_websocket_upgrade(request.headers()) {
        tracing::debug!(request_id = %request_id, service = %service, "No upgrade requested, passing through");
        return pass_through(&state.pass_through, &route, peer, request).await;
    }

    let (mut parts, _body) = request.into_parts();

    if !state.handshake.origin_policy.allows(parts.headers.get(header::ORIGIN)) {
        let origin = parts
            .headers
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        tracing::warn!(request_id = %request_id, service = %service, origin = %origin, "Origin not allowed");
        metrics::record_tunnel_outcome(TunnelOutcome::RejectedOrigin);
        return ErrorBody::new("Origin not allowed", origin).with_status(StatusCode::FORBIDDEN);
    }

    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            tracing::warn!(
                request_id = %request_id,
                service = %service,
                error = %rejection,
                "WebSocket handshake rejected"
            );
            metrics::record_tunnel_outcome(TunnelOutcome::HandshakeFailed);
            return rejection.into_response();
        }
    };

    let failed_request_id = request_id.clone();
    let failed_service = service.clone();
    state
        .handshake
        .apply(upgrade)
        .on_failed_upgrade(move |error| {
            tracing::warn!(
                request_id = %failed_request_id,
                service = %failed_service,
                error = %error,
                "WebSocket upgrade failed"
            );
            metrics::record_tunnel_outcome(TunnelOutcome::HandshakeFailed);
        })
        .on_upgrade(move |socket| bridge(socket, route, state, request_id))
}

/// Dial the backend for an upgraded client socket and run the tunnel.
async fn bridge(mut client: WebSocket, route: Arc<BackendRoute>, state: AppState, request_id: String) {
    let guard = state.tunnels.track();
    let dialed = tokio::select! {
        dialed = dial_backend(route.ws_url().as_str(), state.tunnel.dial_timeout) => dialed,
        _ = state.shutdown.cancelled() => {
            tracing::debug!(request_id = %request_id, service = %route.name(), "Shutdown during backend dial");
            if let Err(e) = SinkExt::close(&mut client).await {
                tracing::debug!(error = %e, "Client close during shutdown");
            }
            return;
        }
    };
    let backend = match dialed {
        Ok(backend) => backend,
        Err(e) => {
            tracing::warn!(
                request_id = %request_id,
                service = %route.name(),
                target = %route.ws_url(),
                error = %e,
                "Backend dial failed, closing client"
            );
            metrics::record_tunnel_outcome(TunnelOutcome::DialFailed);
            if let Err(e) = SinkExt::close(&mut client).await {
                tracing::debug!(error = %e, "Client close after dial failure");
            }
            return;
        }
    };

    metrics::record_tunnel_outcome(TunnelOutcome::Established);
    tracing::debug!(request_id = %request_id, tunnel_id = %guard.id(), "Backend dialed");

    Tunnel::new(
        route.name(),
        client,
        backend,
        &state.shutdown,
        state.tunnel.idle_timeout,
        guard,
    )
    .run()
    .await;
}
