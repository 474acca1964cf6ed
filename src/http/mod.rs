//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, route dispatch)
//!     → request.rs (request ID)
//!     → /api/{service}/...  → forward.rs (unary call, JSON re-encode)
//!     → /ws/{service}       → websocket.rs (inspect headers)
//!                               ├─ upgrade    → tunnel (dial + relay)
//!                               └─ no upgrade → passthrough.rs (streamed proxy)
//!     → response.rs (error envelope, hop-by-hop stripping)
//!     → Send to client
//! ```

pub mod forward;
pub mod passthrough;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use forward::{ForwardError, ForwardedCall, Forwarder, HttpVerb};
pub use request::{RequestIdExt, X_REQUEST_ID};
pub use response::ErrorBody;
pub use server::{AppState, GatewayServer, ServerError};
