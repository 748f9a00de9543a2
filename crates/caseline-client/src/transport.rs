//! WebSocket transport.
//!
//! A thin channel-bridged layer: [`connect`] opens the socket and spawns a
//! task that pumps frames between the connection and a pair of channels.
//! Reconnect policy and frame interpretation stay in the sans-IO core;
//! this module only reports what happened on the wire.

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{connect_async, tungstenite};
use url::Url;

/// Close code reported when the connection drops without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The handshake failed.
    #[error("websocket connect failed: {0}")]
    Connect(#[from] tungstenite::Error),
}

/// Events reported by the socket task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// A text frame arrived.
    Frame(String),
    /// The socket closed with this code. Always the task's final event.
    Closed {
        /// WebSocket close code (1006 when the peer vanished).
        code: u16,
    },
}

enum Outbound {
    Frame(String),
    Close,
}

/// Handle to a live socket task.
///
/// Dropping the handle aborts the task; prefer [`SocketHandle::shutdown`]
/// for a graceful normal-closure teardown.
pub struct SocketHandle {
    outbound: mpsc::Sender<Outbound>,
    /// Events from the socket, ending with [`SocketEvent::Closed`].
    pub events: mpsc::Receiver<SocketEvent>,
    abort_handle: Option<tokio::task::AbortHandle>,
}

impl SocketHandle {
    /// Queue a text frame. Returns whether the task is still accepting.
    pub fn send(&self, frame: String) -> bool {
        self.outbound.try_send(Outbound::Frame(frame)).is_ok()
    }

    /// Tear down gracefully: the task sends a normal-closure frame and
    /// exits on its own instead of being aborted.
    pub fn shutdown(mut self) {
        let _ = self.outbound.try_send(Outbound::Close);
        self.abort_handle = None;
    }
}

impl Drop for SocketHandle {
    fn drop(&mut self) {
        if let Some(handle) = &self.abort_handle {
            handle.abort();
        }
    }
}

/// Open a socket and spawn its pump task.
pub async fn connect(url: &Url) -> Result<SocketHandle, TransportError> {
    let (stream, _response) = connect_async(url.as_str()).await?;
    Ok(attach(stream))
}

/// Spawn the pump task over an already-established stream.
///
/// Split out from [`connect`] so tests can run the pump over an
/// in-memory duplex pipe instead of a real network socket.
pub fn attach<S>(stream: tokio_tungstenite::WebSocketStream<S>) -> SocketHandle
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (outbound_tx, outbound_rx) = mpsc::channel::<Outbound>(32);
    let (event_tx, event_rx) = mpsc::channel::<SocketEvent>(32);

    let handle = tokio::spawn(run_socket(stream, outbound_rx, event_tx));

    SocketHandle {
        outbound: outbound_tx,
        events: event_rx,
        abort_handle: Some(handle.abort_handle()),
    }
}

async fn run_socket<S>(
    stream: tokio_tungstenite::WebSocketStream<S>,
    mut outbound: mpsc::Receiver<Outbound>,
    events: mpsc::Sender<SocketEvent>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut source) = stream.split();

    let close_code = loop {
        tokio::select! {
            request = outbound.recv() => match request {
                Some(Outbound::Frame(text)) => {
                    if let Err(e) = sink.send(tungstenite::Message::Text(text)).await {
                        tracing::debug!(error = %e, "socket send failed");
                        break ABNORMAL_CLOSURE;
                    }
                },
                // Close requested (or the handle was dropped): go out
                // with a normal closure so the server does not log an
                // abnormal disconnect.
                Some(Outbound::Close) | None => {
                    let frame = CloseFrame { code: CloseCode::Normal, reason: "".into() };
                    let _ = sink.send(tungstenite::Message::Close(Some(frame))).await;
                    break u16::from(CloseCode::Normal);
                },
            },
            incoming = source.next() => match incoming {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    if events.send(SocketEvent::Frame(text)).await.is_err() {
                        break u16::from(CloseCode::Normal);
                    }
                },
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    break frame.map_or(ABNORMAL_CLOSURE, |f| u16::from(f.code));
                },
                // Binary/ping/pong frames are not part of this protocol.
                Some(Ok(_)) => {},
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "socket read failed");
                    break ABNORMAL_CLOSURE;
                },
                None => break ABNORMAL_CLOSURE,
            },
        }
    };

    let _ = events.send(SocketEvent::Closed { code: close_code }).await;
}
