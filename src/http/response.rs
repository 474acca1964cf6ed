//! Response shaping for gateway-generated errors.
//!
//! # Responsibilities
//! - Define the fixed JSON error envelope (`message` + `error`)
//! - Map routing failures to HTTP status codes
//! - Strip hop-by-hop headers from pass-through responses
//!
//! # Design Decisions
//! - Backend payloads are never wrapped; only gateway failures use the envelope
//! - Every error response is JSON so unary callers can parse it uniformly

use std::any::Any;

use axum::{
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// JSON body returned for every gateway-side failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>, error: impl ToString) -> Self {
        Self {
            message: message.into(),
            error: error.to_string(),
        }
    }

    /// Pair the envelope with a status code.
    pub fn with_status(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

/// Failures resolved before any backend is contacted.
#[derive(Debug, thiserror::Error)]
pub enum RouteRejection {
    #[error("unknown service '{0}'")]
    UnknownService(String),
    #[error("method {0} is not forwarded")]
    UnsupportedVerb(String),
    #[error("path cannot be forwarded: {0}")]
    InvalidPath(String),
}

impl IntoResponse for RouteRejection {
    fn into_response(self) -> Response {
        match self {
            RouteRejection::UnknownService(name) => {
                ErrorBody::new("Unknown service", name).with_status(StatusCode::NOT_FOUND)
            }
            RouteRejection::UnsupportedVerb(method) => {
                ErrorBody::new("Method not allowed", method).with_status(StatusCode::METHOD_NOT_ALLOWED)
            }
            RouteRejection::InvalidPath(reason) => {
                ErrorBody::new("Invalid request path", reason).with_status(StatusCode::BAD_REQUEST)
            }
        }
    }
}

/// Response for a request whose handler panicked. The panic message is
/// logged, not returned.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("non-string panic payload");
    tracing::error!(panic = %detail, "Request handler panicked");
    ErrorBody::new("Internal server error", "request handler panicked")
        .with_status(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Headers that describe a single transport hop and must not be forwarded.
const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers.remove("proxy-connection");
}
