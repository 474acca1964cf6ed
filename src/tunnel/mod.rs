//! WebSocket tunnels.
//!
//! # Data Flow
//! ```text
//!            ┌──────────── session token (child of shutdown) ───────────┐
//!            │                                                          │
//! client ──▶ │ inbound task:  client_rx ──relay──▶ backend_tx           │ ──▶ backend
//! client ◀── │ outbound task: client_tx ◀──relay── backend_rx           │ ◀── backend
//!            └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Design Decisions
//! - A `Tunnel` owns exactly one client socket and one backend socket
//! - Each direction runs in its own task and cancels the shared session
//!   token when it stops, so the other direction stops promptly
//! - Each direction closes the socket half it writes into; the tunnel is
//!   over only after both tasks have been joined
//! - Frames are opaque: never decoded or inspected

pub mod relay;
pub mod tracker;

use std::fmt;
use std::time::Duration;

use axum::extract::ws::WebSocket;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub use relay::{Direction, DirectionEnd, DirectionReport};
pub use tracker::{TunnelGuard, TunnelId, TunnelTracker};

use relay::RelayFrame;

/// Backend side of a tunnel.
pub type BackendSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on sending a close frame during teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Failure to open the backend side of a tunnel.
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("backend WebSocket connect failed: {0}")]
    Connect(#[from] tungstenite::Error),
    #[error("backend WebSocket connect timed out after {0:?}")]
    Timeout(Duration),
}

/// Open a client WebSocket connection to a backend. Never retries.
pub async fn dial_backend(url: &str, timeout: Option<Duration>) -> Result<BackendSocket, DialError> {
    let connect = tokio_tungstenite::connect_async(url);
    let (socket, _response) = match timeout {
        Some(limit) => tokio::time::timeout(limit, connect)
            .await
            .map_err(|_| DialError::Timeout(limit))??,
        None => connect.await?,
    };
    Ok(socket)
}

/// Outcome of a finished tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelReport {
    pub id: TunnelId,
    pub inbound: DirectionReport,
    pub outbound: DirectionReport,
}

impl TunnelReport {
    /// The direction that ended first for a reason other than cancellation.
    pub fn cause(&self) -> &DirectionReport {
        if self.inbound.end == DirectionEnd::Cancelled {
            &self.outbound
        } else {
            &self.inbound
        }
    }
}

/// A live pairing of one client connection and one backend connection.
pub struct Tunnel {
    service: String,
    client: WebSocket,
    backend: BackendSocket,
    session: CancellationToken,
    idle_timeout: Option<Duration>,
    guard: TunnelGuard,
}

impl fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tunnel")
            .field("id", &self.guard.id())
            .field("service", &self.service)
            .field("cancelled", &self.session.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Tunnel {
    /// Pair two connected sockets. The session token is a child of
    /// `shutdown`, so process shutdown ends the tunnel too.
    pub fn new(
        service: impl Into<String>,
        client: WebSocket,
        backend: BackendSocket,
        shutdown: &CancellationToken,
        idle_timeout: Option<Duration>,
        guard: TunnelGuard,
    ) -> Self {
        Self {
            service: service.into(),
            client,
            backend,
            session: shutdown.child_token(),
            idle_timeout,
            guard,
        }
    }

    pub fn id(&self) -> TunnelId {
        self.guard.id()
    }

    /// Relay frames both ways until either direction stops, then tear down
    /// both connections.
    pub async fn run(self) -> TunnelReport {
        let Tunnel {
            service,
            client,
            backend,
            session,
            idle_timeout,
            guard,
        } = self;
        let id = guard.id();
        let span = tracing::info_span!("tunnel", tunnel_id = %id, service = %service);

        // Dropping `run` early still stops both tasks.
        let _session_guard = session.clone().drop_guard();

        let (client_tx, client_rx) = client.split();
        let (backend_tx, backend_rx) = backend.split();

        tracing::info!(parent: &span, "Tunnel established");

        let inbound = tokio::spawn(
            run_direction(Direction::Inbound, client_rx, backend_tx, session.clone(), idle_timeout)
                .instrument(span.clone()),
        );
        let outbound = tokio::spawn(
            run_direction(Direction::Outbound, backend_rx, client_tx, session.clone(), idle_timeout)
                .instrument(span.clone()),
        );

        let (inbound, outbound) = tokio::join!(inbound, outbound);
        let report = TunnelReport {
            id,
            inbound: joined(Direction::Inbound, inbound),
            outbound: joined(Direction::Outbound, outbound),
        };

        let cause = report.cause();
        if cause.end.is_error() {
            tracing::warn!(
                parent: &span,
                direction = %cause.direction,
                end = ?cause.end,
                inbound_frames = report.inbound.frames,
                outbound_frames = report.outbound.frames,
                "Tunnel closed after relay failure"
            );
        } else {
            tracing::info!(
                parent: &span,
                direction = %cause.direction,
                end = ?cause.end,
                inbound_frames = report.inbound.frames,
                outbound_frames = report.outbound.frames,
                "Tunnel closed"
            );
        }

        drop(guard);
        report
    }
}

fn joined(direction: Direction, result: Result<DirectionReport, tokio::task::JoinError>) -> DirectionReport {
    result.unwrap_or_else(|e| {
        tracing::error!(direction = %direction, error = %e, "Relay task failed");
        DirectionReport {
            direction,
            end: DirectionEnd::Aborted(e.to_string()),
            frames: 0,
        }
    })
}

/// Run one direction, then close the half it writes into.
async fn run_direction<R, W, M, RE, WE>(
    direction: Direction,
    mut source: R,
    mut sink: W,
    session: CancellationToken,
    idle_timeout: Option<Duration>,
) -> DirectionReport
where
    R: Stream<Item = Result<M, RE>> + Unpin,
    M: RelayFrame,
    W: Sink<M::Peer, Error = WE> + Unpin,
    RE: fmt::Display,
    WE: fmt::Display,
{
    let report = relay::relay(direction, &mut source, &mut sink, &session, idle_timeout).await;
    tracing::debug!(direction = %direction, end = ?report.end, frames = report.frames, "Relay direction stopped");

    match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(direction = %direction, error = %e, "Close after relay failed"),
        Err(_) => tracing::debug!(direction = %direction, "Close after relay timed out"),
    }

    report
}
