//! Per-connection plumbing: the handle other tasks write through, the writer
//! task that owns the socket sink, and the reader-side lifecycle
//! (authenticate, register, read, clean up).

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::watch;
use uuid::Uuid;

use super::Hub;
use crate::constants::{ERR_AUTHENTICATION_FAILED, SOCKET_CLOSE_GRACE_MILLIS};
use crate::protocol::Frame;

/// Write side of a registered connection
///
/// Frames are queued on a bounded channel drained by a dedicated writer
/// task, so writes from many reader tasks never interleave on the socket.
/// Flipping the `closed` signal makes both the reader and the writer stop.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: Uuid,
    username: String,
    outbound: mpsc::Sender<String>,
    closed: watch::Sender<bool>,
}

impl ConnectionHandle {
    /// Create a handle and the receiving end of its outbound queue
    pub fn new(username: &str, capacity: usize) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let (closed, _) = watch::channel(false);

        let handle = Arc::new(Self {
            id: Uuid::new_v4(),
            username: username.to_string(),
            outbound,
            closed,
        });

        (handle, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Queue a payload, waiting up to `timeout` for room
    ///
    /// Gives up early if the handle is closed. A queue that stays full for
    /// the whole timeout means the peer stopped reading: the connection is
    /// closed and its reader runs the usual cleanup.
    pub async fn deliver(&self, payload: String, timeout: Duration) -> bool {
        if self.is_closed() {
            return false;
        }

        let mut closed = self.closed_signal();
        let attempt = tokio::time::timeout(timeout, async {
            tokio::select! {
                biased;
                _ = wait_closed(&mut closed) => false,
                sent = self.outbound.send(payload) => sent.is_ok(),
            }
        })
        .await;

        match attempt {
            Ok(sent) => sent,
            Err(_) => {
                tracing::warn!(user = %self.username, conn = %self.id, "Outbound queue stalled, closing connection");
                self.close();
                false
            }
        }
    }

    pub async fn deliver_frame(&self, frame: &Frame, timeout: Duration) -> bool {
        match frame.to_json() {
            Ok(payload) => self.deliver(payload, timeout).await,
            Err(e) => {
                tracing::error!("Frame serialization error: {}", e);
                false
            }
        }
    }

    /// Ask the reader and writer tasks to stop. Idempotent.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Receiver that observes [`close`](Self::close)
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }
}

/// Resolves once the handle is closed or dropped
async fn wait_closed(signal: &mut watch::Receiver<bool>) {
    let _ = signal.wait_for(|closed| *closed).await;
}

/// Drain a connection's outbound queue into the socket
///
/// Exits when the handle is closed, every sender is gone, or the peer
/// stops accepting writes. A close interrupts a write that is blocked on
/// a peer that stopped reading.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<String>,
    mut closed: watch::Receiver<bool>,
) {
    loop {
        let text = tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => break,
            payload = outbound.recv() => match payload {
                Some(text) => text,
                None => break,
            },
        };

        let written = tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => break,
            result = sink.send(Message::Text(text)) => result.is_ok(),
        };
        if !written {
            break;
        }
    }

    let grace = Duration::from_millis(SOCKET_CLOSE_GRACE_MILLIS);
    let _ = tokio::time::timeout(grace, sink.close()).await;
}

enum AuthFailure {
    Timeout,
    Disconnected,
    Malformed,
    Rejected,
}

impl AuthFailure {
    fn as_str(&self) -> &'static str {
        match self {
            AuthFailure::Timeout => "timeout",
            AuthFailure::Disconnected => "disconnected",
            AuthFailure::Malformed => "malformed auth frame",
            AuthFailure::Rejected => "invalid session",
        }
    }
}

/// Wait for the one auth frame a new connection must send
async fn await_auth(
    hub: &Hub,
    stream: &mut SplitStream<WebSocket>,
    deadline: Duration,
) -> Result<String, AuthFailure> {
    let message = match tokio::time::timeout(deadline, stream.next()).await {
        Err(_) => return Err(AuthFailure::Timeout),
        Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => {
            return Err(AuthFailure::Disconnected)
        }
        Ok(Some(Ok(message))) => message,
    };

    let Message::Text(text) = message else {
        return Err(AuthFailure::Malformed);
    };
    let frame = Frame::from_json(&text).map_err(|_| AuthFailure::Malformed)?;

    hub.authenticate(&frame).ok_or(AuthFailure::Rejected)
}

/// Read frames until the peer leaves or the handle is closed
async fn read_loop(hub: &Hub, conn: &ConnectionHandle, stream: &mut SplitStream<WebSocket>) {
    let mut closed = conn.closed_signal();

    loop {
        let message = tokio::select! {
            _ = wait_closed(&mut closed) => {
                tracing::debug!(user = %conn.username(), conn = %conn.id(), "Connection closed by server");
                break;
            }
            message = stream.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => match Frame::from_json(&text) {
                Ok(frame) => hub.dispatch(conn, frame).await,
                Err(e) => {
                    tracing::debug!(user = %conn.username(), error = %e, "Dropping malformed frame");
                }
            },
            Some(Ok(Message::Close(_))) | None => break,
            // Pings are answered by the WebSocket layer
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::debug!(user = %conn.username(), error = %e, "WebSocket read error");
                break;
            }
        }
    }
}

/// Drive one upgraded WebSocket through its whole lifecycle
pub async fn serve_socket(hub: Arc<Hub>, socket: WebSocket, auth_timeout: Duration) {
    let (mut sink, mut stream) = socket.split();

    let username = match await_auth(&hub, &mut stream, auth_timeout).await {
        Ok(username) => username,
        Err(failure) => {
            tracing::warn!(reason = failure.as_str(), "WebSocket authentication failed");
            let grace = Duration::from_millis(SOCKET_CLOSE_GRACE_MILLIS);
            if !matches!(failure, AuthFailure::Disconnected) {
                if let Ok(payload) = Frame::error(ERR_AUTHENTICATION_FAILED).to_json() {
                    let _ = tokio::time::timeout(grace, sink.send(Message::Text(payload))).await;
                }
            }
            let _ = tokio::time::timeout(grace, sink.close()).await;
            return;
        }
    };

    let (conn, outbound) = hub.open_connection(&username);
    let writer = tokio::spawn(write_loop(sink, outbound, conn.closed_signal()));

    hub.register(conn.clone()).await;
    read_loop(&hub, &conn, &mut stream).await;

    conn.close();
    hub.unregister(&conn).await;
    drop(conn);

    if let Err(e) = writer.await {
        tracing::error!("Writer task join error: {:?}", e);
    }
}
