//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (request ID, tracing, CORS, panic recovery)
//! - Dispatch `/api/...` to the unary forwarder and `/ws/...` to the tunnel bridge
//! - Serve until the shutdown token fires, then wait for tunnels to drain

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, Method, Request},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::GatewayConfig;
use crate::http::forward::{ForwardError, Forwarder, HttpVerb};
use crate::http::passthrough::{pass_through_client, PassThroughClient};
use crate::http::request::{propagate_request_id_layer, set_request_id_layer, RequestIdExt};
use crate::http::response::{panic_response, RouteRejection};
use crate::http::websocket::{tunnel_handler, HandshakeConfig};
use crate::observability::metrics;
use crate::routing::{RouteError, RouteTable};
use crate::tunnel::TunnelTracker;

/// Errors raised while assembling the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("route table: {0}")]
    Routes(#[from] RouteError),
    #[error("HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Timeouts applied to tunnels.
#[derive(Debug, Clone, Copy, Default)]
pub struct TunnelSettings {
    pub dial_timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RouteTable>,
    pub forwarder: Forwarder,
    pub pass_through: PassThroughClient,
    pub handshake: Arc<HandshakeConfig>,
    pub tunnel: TunnelSettings,
    pub tunnels: TunnelTracker,
    pub max_body_bytes: usize,
    /// Root token; every tunnel session is a child of it.
    pub shutdown: CancellationToken,
}

/// HTTP server for the gateway.
pub struct GatewayServer {
    config: GatewayConfig,
    routes: Arc<RouteTable>,
    forwarder: Forwarder,
    pass_through: PassThroughClient,
    tunnels: TunnelTracker,
}

impl GatewayServer {
    /// Create a new server with the given (already validated) configuration.
    pub fn new(config: GatewayConfig) -> Result<Self, ServerError> {
        let routes = Arc::new(RouteTable::from_config(&config.services)?);
        let forwarder = Forwarder::new(config.timeouts.unary_request_secs.map(Duration::from_secs))?;

        Ok(Self {
            config,
            routes,
            forwarder,
            pass_through: pass_through_client(),
            tunnels: TunnelTracker::new(),
        })
    }

    /// Build the Axum router. Tunnels opened through it end when `shutdown`
    /// is cancelled.
    pub fn router(&self, shutdown: CancellationToken) -> Router {
        let state = AppState {
            routes: self.routes.clone(),
            forwarder: self.forwarder.clone(),
            pass_through: self.pass_through.clone(),
            handshake: Arc::new(HandshakeConfig::from_config(&self.config.websocket)),
            tunnel: TunnelSettings {
                dial_timeout: self.config.timeouts.dial_secs.map(Duration::from_secs),
                idle_timeout: self.config.timeouts.relay_idle_secs.map(Duration::from_secs),
            },
            tunnels: self.tunnels.clone(),
            max_body_bytes: self.config.limits.max_body_bytes,
            shutdown,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/api/{service}", any(unary_collection))
            .route("/api/{service}/{*rest}", any(unary_member))
            .route("/ws/{service}", any(tunnel_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(set_request_id_layer())
                    .layer(TraceLayer::new_for_http())
                    .layer(propagate_request_id_layer())
                    .layer(cors_layer())
                    .layer(CatchPanicLayer::custom(panic_response)),
            )
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` is cancelled.
    pub async fn run(self, listener: TcpListener, shutdown: CancellationToken) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            services = ?self.routes.service_names(),
            "HTTP server starting"
        );

        let app = self
            .router(shutdown.clone())
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .await?;

        let grace = Duration::from_secs(self.config.timeouts.shutdown_grace_secs);
        if !self.tunnels.wait_idle(grace).await {
            tracing::warn!(
                open_tunnels = self.tunnels.active_count(),
                "Tunnels still open after shutdown grace period"
            );
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn tunnels(&self) -> &TunnelTracker {
        &self.tunnels
    }
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::ORIGIN, header::CONTENT_TYPE, header::ACCEPT])
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "services": state.routes.service_names(),
        "active_tunnels": state.tunnels.active_count(),
    }))
}

async fn unary_collection(
    State(state): State<AppState>,
    Path(service): Path<String>,
    request: Request<Body>,
) -> Response {
    forward_unary(&state, service, None, request).await
}

async fn unary_member(
    State(state): State<AppState>,
    Path((service, _rest)): Path<(String, String)>,
    request: Request<Body>,
) -> Response {
    // The extracted `rest` is percent-decoded; forward the encoded form.
    let rest = raw_member_path(request.uri().path()).map(str::to_string);
    forward_unary(&state, service, rest, request).await
}

/// The still-encoded path after `/api/{service}/`.
fn raw_member_path(path: &str) -> Option<&str> {
    path.strip_prefix("/api/")?
        .split_once('/')
        .map(|(_, rest)| rest)
}

/// Look up the service, forward one unary call, and re-emit the decoded
/// JSON with the backend's status.
async fn forward_unary(
    state: &AppState,
    service: String,
    rest: Option<String>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let request_id = request.request_id().to_string();

    let Some(route) = state.routes.get(&service) else {
        tracing::warn!(request_id = %request_id, service = %service, "No route for service");
        return RouteRejection::UnknownService(service).into_response();
    };

    let verb = match HttpVerb::try_from(request.method()) {
        Ok(verb) => verb,
        Err(method) => {
            tracing::warn!(request_id = %request_id, method = %method, "Method not forwarded");
            return RouteRejection::UnsupportedVerb(method.to_string()).into_response();
        }
    };

    let url = match route.unary_url(rest.as_deref(), request.uri().query()) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!(request_id = %request_id, service = %service, error = %e, "Path not forwarded");
            return RouteRejection::InvalidPath(e.to_string()).into_response();
        }
    };

    let body = if verb.carries_body() {
        match axum::body::to_bytes(request.into_body(), state.max_body_bytes).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                let err = ForwardError::InboundBody(e.to_string());
                tracing::warn!(request_id = %request_id, service = %service, error = %err, "Inbound body rejected");
                metrics::record_unary(&service, err.status().as_u16(), start);
                return err.into_response();
            }
        }
    } else {
        None
    };

    tracing::debug!(
        request_id = %request_id,
        service = %service,
        verb = %verb,
        target = %url,
        "Forwarding unary call"
    );

    match state.forwarder.forward(verb, url.as_str(), body).await {
        Ok(call) => {
            metrics::record_unary(&service, call.status.as_u16(), start);
            call.into_response()
        }
        Err(e) => {
            tracing::error!(
                request_id = %request_id,
                service = %service,
                target = %url,
                stage = e.stage(),
                error = %e,
                "Unary forward failed"
            );
            metrics::record_unary(&service, e.status().as_u16(), start);
            e.into_response()
        }
    }
}
