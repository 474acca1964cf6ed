//! A stand-in comments service for trying the gateway locally.
//!
//! ```text
//! cargo run --example mock_service            # listens on 127.0.0.1:8081
//! cargo run -- --config gateway.example.toml
//! curl localhost:8080/api/comments
//! websocat ws://localhost:8080/ws/comments
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

const PUSH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Comment {
    #[serde(rename = "ID")]
    id: String,
    content: String,
    emotion: String,
}

#[derive(Deserialize)]
struct NewComment {
    content: String,
    emotion: String,
}

type Store = Arc<Mutex<Vec<Comment>>>;

fn snapshot(store: &Store) -> Vec<Comment> {
    store.lock().map(|c| c.clone()).unwrap_or_default()
}

async fn list(State(store): State<Store>) -> Json<Vec<Comment>> {
    Json(snapshot(&store))
}

async fn get_one(State(store): State<Store>, Path(id): Path<String>) -> Response {
    match snapshot(&store).into_iter().find(|c| c.id == id) {
        Some(comment) => Json(comment).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "message": "Comment not found",
                "error": format!("There is no comment with '{id}' ID"),
            })),
        )
            .into_response(),
    }
}

async fn create(State(store): State<Store>, Json(new): Json<NewComment>) -> Response {
    let comment = Comment {
        id: uuid::Uuid::new_v4().to_string(),
        content: new.content,
        emotion: new.emotion,
    };
    if let Ok(mut comments) = store.lock() {
        comments.push(comment.clone());
    }
    tracing::info!(id = %comment.id, "Comment created");
    (StatusCode::CREATED, Json(comment)).into_response()
}

async fn push(State(store): State<Store>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| push_comments(socket, store))
}

/// Send the full list on connect and then on every tick until the peer goes
/// away.
async fn push_comments(mut socket: WebSocket, store: Store) {
    tracing::info!("WebSocket connection established on /ws/comments");
    let mut ticker = tokio::time::interval(PUSH_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let payload = match serde_json::to_string(&snapshot(&store)) {
                    Ok(p) => p,
                    Err(_) => r#"{"error": "Failed to retrieve comments"}"#.to_string(),
                };
                if socket.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    tracing::info!("WebSocket connection closed");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().init();

    let store: Store = Arc::new(Mutex::new(vec![Comment {
        id: uuid::Uuid::new_v4().to_string(),
        content: "A wonderful read".into(),
        emotion: "happy".into(),
    }]));

    let app = Router::new()
        .route("/api/comments", get(list).post(create))
        .route("/api/comments/{id}", get(get_one))
        .route("/ws/comments", get(push))
        .with_state(store);

    let addr = std::env::args()
        .nth(1)
        .and_then(|a| a.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8081)));
    println!("Mock comments service listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
