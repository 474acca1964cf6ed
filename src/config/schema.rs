//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the API gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Backend services reachable through the gateway.
    pub services: Vec<ServiceConfig>,

    /// Server-side WebSocket handshake settings.
    pub websocket: WebSocketConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request size limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            services: vec![
                ServiceConfig::new(
                    "comments",
                    "http://bookstore-api-comments-svc:8080/api/comments",
                    "ws://bookstore-api-comments-svc:8080/ws/comments",
                ),
                ServiceConfig::new(
                    "likes",
                    "http://bookstore-api-likes-svc:8080/api/likes",
                    "ws://bookstore-api-likes-svc:8080/ws/likes",
                ),
            ],
            websocket: WebSocketConfig::default(),
            timeouts: TimeoutConfig::default(),
            limits: LimitsConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// A backend service and the two URLs it is reached on.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Logical service name, used as the `{service}` path segment.
    pub name: String,

    /// Base URL for unary HTTP calls (e.g., "http://comments:8080/api/comments").
    pub api_url: String,

    /// WebSocket endpoint URL (e.g., "ws://comments:8080/ws/comments").
    pub ws_url: String,
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>, api_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_url: api_url.into(),
            ws_url: ws_url.into(),
        }
    }
}

/// Server-side WebSocket handshake settings, applied per session.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Read buffer size in bytes.
    pub read_buffer_size: usize,

    /// Write buffer size in bytes.
    pub write_buffer_size: usize,

    /// Largest message accepted from a client, in bytes.
    pub max_message_size: usize,

    /// Origins allowed to open a tunnel. Empty or `"*"` allows any origin.
    pub allowed_origins: Vec<String>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 1024,
            write_buffer_size: 1024,
            max_message_size: 64 << 20,
            allowed_origins: Vec::new(),
        }
    }
}

/// Timeout configuration.
///
/// Unset values mean "no timeout": calls block until data, error or shutdown.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total time allowed for one unary call, in seconds.
    pub unary_request_secs: Option<u64>,

    /// Time allowed to dial the backend WebSocket, in seconds.
    pub dial_secs: Option<u64>,

    /// Longest a relay direction may wait for the next frame, in seconds.
    pub relay_idle_secs: Option<u64>,

    /// How long shutdown waits for open tunnels to finish teardown.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            unary_request_secs: None,
            dial_secs: None,
            relay_idle_secs: None,
            shutdown_grace_secs: 10,
        }
    }
}

/// Request size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum buffered request body for unary calls, in bytes.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
