//! One relay direction of a tunnel.
//!
//! A direction reads frames from one socket half and writes them into the
//! other until the first of: close frame, end of stream, read error, write
//! error, idle timeout, or cancellation of the session token. Whatever the
//! reason, it cancels the session token on exit so the opposite direction
//! stops as well.

use std::fmt;
use std::time::Duration;

use axum::extract::ws::Message as ClientMessage;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::Message as BackendMessage;
use tokio_util::sync::CancellationToken;

use crate::observability::metrics;

/// Which way frames flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client socket → backend socket.
    Inbound,
    /// Backend socket → client socket.
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "client_to_backend",
            Direction::Outbound => "backend_to_client",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with a frame read from the source half.
#[derive(Debug, PartialEq)]
pub enum Relayed<M> {
    Forward(M),
    /// Control frames: answered by the WebSocket layer itself.
    Skip,
    Close,
}

/// A frame type that can be carried across to the peer socket's frame type.
///
/// Data frames go out as text. A binary payload that is not valid UTF-8
/// cannot be carried by a text frame and is sent as binary.
pub trait RelayFrame {
    type Peer;

    fn relay(self) -> Relayed<Self::Peer>;
}

impl RelayFrame for ClientMessage {
    type Peer = BackendMessage;

    fn relay(self) -> Relayed<BackendMessage> {
        match self {
            ClientMessage::Text(text) => Relayed::Forward(BackendMessage::Text(text.to_string().into())),
            ClientMessage::Binary(data) => Relayed::Forward(match std::str::from_utf8(&data) {
                Ok(text) => BackendMessage::Text(text.to_owned().into()),
                Err(_) => BackendMessage::Binary(data),
            }),
            ClientMessage::Ping(_) | ClientMessage::Pong(_) => Relayed::Skip,
            ClientMessage::Close(_) => Relayed::Close,
        }
    }
}

impl RelayFrame for BackendMessage {
    type Peer = ClientMessage;

    fn relay(self) -> Relayed<ClientMessage> {
        match self {
            BackendMessage::Text(text) => Relayed::Forward(ClientMessage::Text(text.to_string().into())),
            BackendMessage::Binary(data) => Relayed::Forward(match std::str::from_utf8(&data) {
                Ok(text) => ClientMessage::Text(text.to_owned().into()),
                Err(_) => ClientMessage::Binary(data),
            }),
            BackendMessage::Ping(_) | BackendMessage::Pong(_) | BackendMessage::Frame(_) => {
                Relayed::Skip
            }
            BackendMessage::Close(_) => Relayed::Close,
        }
    }
}

/// Why a direction stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectionEnd {
    /// The source sent a close frame or its stream ended.
    Closed,
    ReadError(String),
    WriteError(String),
    IdleTimeout,
    /// The other direction or process shutdown ended the session.
    Cancelled,
    /// The relay task itself failed.
    Aborted(String),
}

impl DirectionEnd {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            DirectionEnd::ReadError(_) | DirectionEnd::WriteError(_) | DirectionEnd::Aborted(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectionReport {
    pub direction: Direction,
    pub end: DirectionEnd,
    pub frames: u64,
}

/// Move frames from `source` to `sink` until the direction ends.
///
/// Reads and writes are both raced against `session`, so a slow peer on the
/// write side cannot keep this direction alive after the session is over.
pub async fn relay<R, W, M, RE, WE>(
    direction: Direction,
    source: &mut R,
    sink: &mut W,
    session: &CancellationToken,
    idle_timeout: Option<Duration>,
) -> DirectionReport
where
    R: Stream<Item = Result<M, RE>> + Unpin,
    M: RelayFrame,
    W: Sink<M::Peer, Error = WE> + Unpin,
    RE: fmt::Display,
    WE: fmt::Display,
{
    let mut frames = 0u64;

    let end = loop {
        let next = tokio::select! {
            biased;
            _ = session.cancelled() => break DirectionEnd::Cancelled,
            next = next_frame(source, idle_timeout) => next,
        };

        let frame = match next {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => break DirectionEnd::ReadError(e.to_string()),
            Ok(None) => break DirectionEnd::Closed,
            Err(_) => break DirectionEnd::IdleTimeout,
        };

        let forward = match frame.relay() {
            Relayed::Forward(forward) => forward,
            Relayed::Skip => continue,
            Relayed::Close => break DirectionEnd::Closed,
        };

        tokio::select! {
            biased;
            _ = session.cancelled() => break DirectionEnd::Cancelled,
            sent = sink.send(forward) => {
                if let Err(e) = sent {
                    break DirectionEnd::WriteError(e.to_string());
                }
            }
        }

        frames += 1;
        metrics::record_tunnel_frame(direction);
    };

    session.cancel();

    DirectionReport {
        direction,
        end,
        frames,
    }
}

async fn next_frame<R>(
    source: &mut R,
    idle_timeout: Option<Duration>,
) -> Result<Option<R::Item>, tokio::time::error::Elapsed>
where
    R: Stream + Unpin,
{
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, source.next()).await,
        None => Ok(source.next().await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{sink, stream};
    use std::convert::Infallible;

    fn text(s: &str) -> ClientMessage {
        ClientMessage::Text(s.to_string().into())
    }

    #[tokio::test]
    async fn forwards_in_order_and_stops_at_close() {
        let mut source = stream::iter(vec![
            Ok::<_, Infallible>(text("one")),
            Ok(ClientMessage::Ping(Default::default())),
            Ok(text(r#"{"q":"hi"}"#)),
            Ok(ClientMessage::Close(None)),
            Ok(text("never")),
        ]);
        let mut sink: Vec<BackendMessage> = Vec::new();
        let session = CancellationToken::new();

        let report = relay(Direction::Inbound, &mut source, &mut sink, &session, None).await;

        assert_eq!(report.end, DirectionEnd::Closed);
        assert_eq!(report.frames, 2);
        assert_eq!(
            sink,
            vec![
                BackendMessage::text("one".to_string()),
                BackendMessage::text(r#"{"q":"hi"}"#.to_string()),
            ]
        );
        assert!(session.is_cancelled(), "ending a direction cancels the session");
    }

    #[tokio::test]
    async fn read_error_ends_direction() {
        let mut source = stream::iter(vec![
            Ok(BackendMessage::text("a".to_string())),
            Err("connection reset"),
        ]);
        let mut sink: Vec<ClientMessage> = Vec::new();
        let session = CancellationToken::new();

        let report = relay(Direction::Outbound, &mut source, &mut sink, &session, None).await;

        assert_eq!(report.end, DirectionEnd::ReadError("connection reset".into()));
        assert_eq!(report.frames, 1);
        assert!(report.end.is_error());
        assert!(session.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_session_stops_a_blocked_read() {
        let mut source = stream::pending::<Result<ClientMessage, Infallible>>();
        let mut sink: Vec<BackendMessage> = Vec::new();
        let session = CancellationToken::new();

        let canceller = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let report = tokio::time::timeout(
            Duration::from_secs(2),
            relay(Direction::Inbound, &mut source, &mut sink, &session, None),
        )
        .await
        .expect("direction must stop once the session is cancelled");

        assert_eq!(report.end, DirectionEnd::Cancelled);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn idle_timeout_is_opt_in() {
        let mut source = stream::pending::<Result<ClientMessage, Infallible>>();
        let mut sink: Vec<BackendMessage> = Vec::new();
        let session = CancellationToken::new();

        let report = relay(
            Direction::Inbound,
            &mut source,
            &mut sink,
            &session,
            Some(Duration::from_millis(20)),
        )
        .await;

        assert_eq!(report.end, DirectionEnd::IdleTimeout);
        assert!(session.is_cancelled());
    }

    #[test]
    fn control_frames_are_not_forwarded() {
        assert_eq!(ClientMessage::Pong(Default::default()).relay(), Relayed::Skip);
        assert_eq!(BackendMessage::Ping(Default::default()).relay(), Relayed::Skip);
        assert_eq!(BackendMessage::Close(None).relay(), Relayed::Close);
    }

    #[test]
    fn utf8_binary_goes_out_as_text() {
        assert_eq!(
            ClientMessage::Binary(r#"{"q":"hi"}"#.into()).relay(),
            Relayed::Forward(BackendMessage::text(r#"{"q":"hi"}"#.to_string()))
        );
        assert_eq!(
            BackendMessage::Binary("[1,2]".into()).relay(),
            Relayed::Forward(ClientMessage::Text("[1,2]".to_string().into()))
        );
    }

    #[test]
    fn non_utf8_binary_stays_binary() {
        let payload = vec![0u8, 1, 2, 255];
        assert_eq!(
            ClientMessage::Binary(payload.clone().into()).relay(),
            Relayed::Forward(BackendMessage::binary(payload.clone()))
        );
        assert_eq!(
            BackendMessage::binary(payload.clone()).relay(),
            Relayed::Forward(ClientMessage::Binary(payload.into()))
        );
    }

    #[tokio::test]
    async fn write_error_ends_direction() {
        let mut source = stream::iter(vec![
            Ok::<_, Infallible>(text("lost")),
            Ok(text("never read")),
        ]);
        let mut sink = Box::pin(sink::unfold((), |(), _frame: BackendMessage| async move {
            Err::<(), _>("broken pipe")
        }));
        let session = CancellationToken::new();

        let report = relay(Direction::Inbound, &mut source, &mut sink, &session, None).await;

        assert_eq!(report.end, DirectionEnd::WriteError("broken pipe".into()));
        assert_eq!(report.frames, 0);
        assert!(report.end.is_error());
        assert!(session.is_cancelled());
    }
}
