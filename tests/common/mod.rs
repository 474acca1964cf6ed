//! Shared utilities for integration testing: an axum mock backend and a
//! gateway started on an ephemeral port.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use api_gateway::config::{GatewayConfig, ServiceConfig};
use api_gateway::{GatewayServer, Shutdown};
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// What the mock backend observed.
#[derive(Default)]
pub struct MockState {
    pub comments: Mutex<Vec<Value>>,
    /// Content-Type of every unary request, in arrival order.
    pub content_types: Mutex<Vec<Option<String>>>,
    /// Raw path and query of every unary request, as received.
    pub targets: Mutex<Vec<String>>,
    /// Kind ("text" or "binary") of every data frame the echo endpoint read.
    pub frame_kinds: Mutex<Vec<&'static str>>,
    /// Accepted WebSocket handshakes.
    pub ws_connections: AtomicUsize,
    /// WebSocket sessions whose read loop has ended.
    pub ws_closed: AtomicUsize,
}

impl MockState {
    pub fn ws_connections(&self) -> usize {
        self.ws_connections.load(Ordering::SeqCst)
    }

    pub fn ws_closed(&self) -> usize {
        self.ws_closed.load(Ordering::SeqCst)
    }

    pub fn last_content_type(&self) -> Option<String> {
        self.content_types.lock().unwrap().last().cloned().flatten()
    }

    pub fn targets(&self) -> Vec<String> {
        self.targets.lock().unwrap().clone()
    }

    pub fn frame_kinds(&self) -> Vec<&'static str> {
        self.frame_kinds.lock().unwrap().clone()
    }
}

/// Start a mock backend service on an ephemeral port.
///
/// - `/api/comments`, `/api/comments/{id}`: JSON REST resource
/// - `/api/broken`: 200 with a non-JSON body
/// - `/ws/comments`: WebSocket echo
/// - `/ws/push`: pushes the collection once, then closes
/// - `/ws/drop`: reads one frame, then drops the TCP connection without a
///   close frame
/// - `/ws/plain`: ordinary HTTP endpoint describing the request it saw
pub async fn start_mock_backend() -> (SocketAddr, Arc<MockState>) {
    let state = Arc::new(MockState::default());
    state
        .comments
        .lock()
        .unwrap()
        .extend([
            json!({"ID": "c1", "Content": "Great book", "Emotion": "happy"}),
            json!({"ID": "c2", "Content": "Too long", "Emotion": "sad"}),
        ]);

    let app = Router::new()
        .route("/api/comments", any(comments_collection))
        .route("/api/comments/{id}", any(comments_member))
        .route("/api/broken", get(|| async { "definitely not json" }))
        .route("/ws/comments", get(echo_ws))
        .route("/ws/push", get(push_ws))
        .route("/ws/drop", get(drop_ws))
        .route("/ws/plain", any(plain))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

fn record_request(state: &MockState, uri: &Uri, headers: &HeaderMap) {
    let target = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_default();
    state.targets.lock().unwrap().push(target);
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.content_types.lock().unwrap().push(content_type);
}

async fn comments_collection(
    State(state): State<Arc<MockState>>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    uri: Uri,
    body: Bytes,
) -> Response {
    record_request(&state, &uri, &headers);
    match method {
        m if m == Method::GET => {
            let comments = state.comments.lock().unwrap().clone();
            let limit = query
                .get("limit")
                .and_then(|l| l.parse::<usize>().ok())
                .unwrap_or(comments.len());
            Json(comments.into_iter().take(limit).collect::<Vec<_>>()).into_response()
        }
        m if m == Method::POST => {
            let mut comment: Value = match serde_json::from_slice(&body) {
                Ok(v) => v,
                Err(e) => {
                    return (
                        StatusCode::BAD_REQUEST,
                        Json(json!({"message": "Invalid request payload", "error": e.to_string()})),
                    )
                        .into_response()
                }
            };
            let mut comments = state.comments.lock().unwrap();
            comment["ID"] = json!(format!("c{}", comments.len() + 1));
            comments.push(comment.clone());
            (StatusCode::CREATED, Json(comment)).into_response()
        }
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

async fn comments_member(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Response {
    record_request(&state, &uri, &headers);
    if method == Method::GET {
        let comments = state.comments.lock().unwrap();
        return match comments.iter().find(|c| c["ID"] == json!(id)) {
            Some(comment) => Json(comment.clone()).into_response(),
            None => (
                StatusCode::NOT_FOUND,
                Json(json!({
                    "message": "Comment not found",
                    "error": format!("There is no comment with '{id}' ID"),
                })),
            )
                .into_response(),
        };
    }

    let body: Value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    let status = if method == Method::DELETE {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    (status, Json(json!({"method": method.as_str(), "id": id, "body": body}))).into_response()
}

async fn echo_ws(State(state): State<Arc<MockState>>, ws: WebSocketUpgrade) -> Response {
    state.ws_connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| echo_session(socket, state))
}

async fn echo_session(mut socket: WebSocket, state: Arc<MockState>) {
    while let Some(Ok(message)) = socket.recv().await {
        let reply = match message {
            Message::Text(_) => {
                state.frame_kinds.lock().unwrap().push("text");
                message
            }
            Message::Binary(_) => {
                state.frame_kinds.lock().unwrap().push("binary");
                message
            }
            Message::Close(_) => break,
            _ => continue,
        };
        if socket.send(reply).await.is_err() {
            break;
        }
    }
    state.ws_closed.fetch_add(1, Ordering::SeqCst);
}

async fn push_ws(State(state): State<Arc<MockState>>, ws: WebSocketUpgrade) -> Response {
    state.ws_connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |mut socket| async move {
        let snapshot = Value::Array(state.comments.lock().unwrap().clone()).to_string();
        let _ = socket.send(Message::Text(snapshot.into())).await;
        let _ = socket.send(Message::Close(None)).await;
        state.ws_closed.fetch_add(1, Ordering::SeqCst);
    })
}

async fn drop_ws(State(state): State<Arc<MockState>>, ws: WebSocketUpgrade) -> Response {
    state.ws_connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |mut socket| async move {
        let _ = socket.recv().await;
        drop(socket);
        state.ws_closed.fetch_add(1, Ordering::SeqCst);
    })
}

async fn plain(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    (
        StatusCode::ACCEPTED,
        [("x-backend", "mock")],
        Json(json!({
            "method": method.as_str(),
            "path": uri.path(),
            "query": uri.query(),
            "x_custom": header("x-custom"),
            "forwarded_for": header("x-forwarded-for"),
            "upgrade": header("upgrade"),
            "body": String::from_utf8_lossy(&body),
        })),
    )
        .into_response()
}

/// Gateway config pointing every test service at `backend`.
pub fn gateway_config(backend: SocketAddr) -> GatewayConfig {
    let dead = dead_addr();
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.timeouts.shutdown_grace_secs = 5;
    config.services = vec![
        ServiceConfig::new(
            "comments",
            format!("http://{backend}/api/comments"),
            format!("ws://{backend}/ws/comments"),
        ),
        ServiceConfig::new(
            "broken",
            format!("http://{backend}/api/broken"),
            format!("ws://{backend}/ws/comments"),
        ),
        ServiceConfig::new(
            "push",
            format!("http://{backend}/api/comments"),
            format!("ws://{backend}/ws/push"),
        ),
        ServiceConfig::new(
            "dropper",
            format!("http://{backend}/api/comments"),
            format!("ws://{backend}/ws/drop"),
        ),
        ServiceConfig::new(
            "plain",
            format!("http://{backend}/api/comments"),
            format!("ws://{backend}/ws/plain"),
        ),
        ServiceConfig::new(
            "down",
            format!("http://{dead}/api/comments"),
            format!("ws://{dead}/ws/comments"),
        ),
    ];
    config
}

/// An address nothing is listening on.
pub fn dead_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

pub struct RunningGateway {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), std::io::Error>>,
}

/// Start a gateway on an ephemeral port.
pub async fn start_gateway(config: GatewayConfig) -> RunningGateway {
    let server = GatewayServer::new(config).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let token = shutdown.token();
    let handle = tokio::spawn(async move { server.run(listener, token).await });
    RunningGateway {
        addr,
        shutdown,
        handle,
    }
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Poll `check` until it holds or `limit` elapses.
pub async fn eventually(limit: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
