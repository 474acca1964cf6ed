//! Unary forwarding.
//!
//! # Responsibilities
//! - Build one outbound request per inbound REST call
//! - Decode the backend's JSON body into an untyped value
//! - Re-emit the value with the backend's original status code
//!
//! # Design Decisions
//! - Payload-agnostic: bodies decode to `serde_json::Value`, no schema
//! - Never retries; one failed attempt is terminal for the request
//! - Each failure stage is a distinct `ForwardError` variant with its own message

use std::fmt;
use std::time::Duration;

use axum::{
    body::Bytes,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

use crate::http::response::ErrorBody;

/// HTTP verbs the forwarder accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpVerb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVerb::Get => "GET",
            HttpVerb::Post => "POST",
            HttpVerb::Put => "PUT",
            HttpVerb::Patch => "PATCH",
            HttpVerb::Delete => "DELETE",
        }
    }

    /// Whether the outbound request carries a JSON body.
    pub fn carries_body(&self) -> bool {
        matches!(self, HttpVerb::Post | HttpVerb::Put | HttpVerb::Patch)
    }

    fn method(&self) -> Method {
        match self {
            HttpVerb::Get => Method::GET,
            HttpVerb::Post => Method::POST,
            HttpVerb::Put => Method::PUT,
            HttpVerb::Patch => Method::PATCH,
            HttpVerb::Delete => Method::DELETE,
        }
    }
}

impl TryFrom<&Method> for HttpVerb {
    type Error = Method;

    fn try_from(method: &Method) -> Result<Self, Self::Error> {
        [
            HttpVerb::Get,
            HttpVerb::Post,
            HttpVerb::Put,
            HttpVerb::Patch,
            HttpVerb::Delete,
        ]
        .into_iter()
        .find(|verb| verb.method() == *method)
        .ok_or_else(|| method.clone())
    }
}

impl fmt::Display for HttpVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure stages of a unary call.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("failed to read inbound request body: {0}")]
    InboundBody(String),
    #[error("failed to build request: {0}")]
    Build(#[source] reqwest::Error),
    #[error("failed to send request: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("failed to read response body: {0}")]
    ReadBody(#[source] reqwest::Error),
    #[error("failed to parse response body: {0}")]
    Decode(#[source] serde_json::Error),
}

impl ForwardError {
    /// Human message for the JSON error envelope.
    pub fn message(&self) -> &'static str {
        match self {
            ForwardError::InboundBody(_) => "Error reading request body",
            ForwardError::Build(_) => "Error creating request",
            ForwardError::Transport(_) => "Error sending request",
            ForwardError::ReadBody(_) => "Error reading response body",
            ForwardError::Decode(_) => "Error parsing response body",
        }
    }

    /// Short stage label for logs and metrics.
    pub fn stage(&self) -> &'static str {
        match self {
            ForwardError::InboundBody(_) => "inbound_body",
            ForwardError::Build(_) => "build",
            ForwardError::Transport(_) => "transport",
            ForwardError::ReadBody(_) => "read_body",
            ForwardError::Decode(_) => "decode",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ForwardError::InboundBody(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> String {
        match self {
            ForwardError::InboundBody(e) => e.clone(),
            ForwardError::Build(e) | ForwardError::Transport(e) | ForwardError::ReadBody(e) => {
                e.to_string()
            }
            ForwardError::Decode(e) => e.to_string(),
        }
    }
}

impl IntoResponse for ForwardError {
    fn into_response(self) -> Response {
        ErrorBody::new(self.message(), self.detail()).with_status(self.status())
    }
}

/// One outbound unary request and its decoded response.
#[derive(Debug, Clone)]
pub struct ForwardedCall {
    pub verb: HttpVerb,
    pub url: String,
    pub status: StatusCode,
    pub payload: Value,
}

impl IntoResponse for ForwardedCall {
    fn into_response(self) -> Response {
        (self.status, Json(self.payload)).into_response()
    }
}

/// Issues unary calls with a shared HTTP client.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    /// Create a forwarder; `timeout` of `None` means calls wait until the
    /// transport itself fails.
    pub fn new(timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Forward one call and decode the JSON response.
    pub async fn forward(
        &self,
        verb: HttpVerb,
        url: &str,
        body: Option<Bytes>,
    ) -> Result<ForwardedCall, ForwardError> {
        let mut builder = self.client.request(verb.method(), url);
        if verb.carries_body() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }
        let request = builder.build().map_err(ForwardError::Build)?;

        let response = self
            .client
            .execute(request)
            .await
            .map_err(ForwardError::Transport)?;
        let status = response.status();

        let bytes = response.bytes().await.map_err(ForwardError::ReadBody)?;
        let payload: Value = serde_json::from_slice(&bytes).map_err(ForwardError::Decode)?;

        Ok(ForwardedCall {
            verb,
            url: url.to_string(),
            status,
            payload,
        })
    }
}
