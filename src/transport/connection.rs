//! Client-side TCP connection and I/O loop.
//!
//! A [`Connection`] owns one TCP stream through a spawned tokio task. The
//! task is the only writer on the socket, so frames never interleave, and
//! it is always reading, so a peer hang-up is noticed while the connection
//! sits idle in a pool.
//!
//! # I/O Loop
//!
//! The task handles:
//!
//! - Outgoing requests from [`Connection::send`] (at most one outstanding)
//! - The reply frame for the outstanding request
//! - Unsolicited frames that arrive with nothing outstanding
//! - Shutdown on request, peer close, or protocol error
//!
//! # State Machine
//!
//! ```text
//! Idle → send() → Busy → reply → Idle
//!                   └──→ timeout / error / peer close → Closed
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, timeout_at};
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::FrameCodec;

use super::Endpoint;

// ============================================================================
// Types
// ============================================================================

/// Callback for frames that arrive while no request is outstanding.
pub type UnsolicitedHandler = Box<dyn Fn(ConnectionId, Bytes) + Send + Sync>;

/// Handler slot shared with the I/O loop. The loop clones the handler out
/// before calling it, so a handler may replace or clear the slot.
type SharedHandler = Arc<Mutex<Option<Arc<dyn Fn(ConnectionId, Bytes) + Send + Sync>>>>;

/// Result slot of the single outstanding request.
type ReplySender = oneshot::Sender<Result<Bytes>>;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Open with no request outstanding.
    Idle,
    /// A request was written and its reply has not been consumed.
    Busy,
    /// Socket closed; the connection cannot be used again.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the I/O loop.
enum ConnectionCommand {
    /// Write a request frame and route the next inbound frame back.
    ///
    /// The write itself must finish by `deadline`.
    Send {
        payload: Bytes,
        deadline: Instant,
        reply_tx: ReplySender,
    },
    /// Close the socket.
    Shutdown,
}

/// The request currently awaiting its reply.
struct PendingRequest {
    reply_tx: ReplySender,
    sent_at: Instant,
}

// ============================================================================
// CloseHandle
// ============================================================================

/// Detached handle that can close a connection it does not own.
///
/// The pool keeps one per borrowed connection so `close()` can reach
/// connections that are out on loan.
#[derive(Clone)]
pub(crate) struct CloseHandle {
    id: ConnectionId,
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
}

impl CloseHandle {
    /// Asks the I/O loop to close the socket.
    pub(crate) fn close(&self) {
        if self.command_tx.send(ConnectionCommand::Shutdown).is_ok() {
            debug!(conn = %self.id, "Force-closing borrowed connection");
        }
    }
}

// ============================================================================
// Connection
// ============================================================================

/// A live TCP connection supporting one request/reply exchange at a time.
///
/// A `Connection` is exclusively owned: by the pool while idle, by a
/// borrower while in use. Dropping it closes the socket.
pub struct Connection {
    /// Process-unique identifier.
    id: ConnectionId,
    /// Remote endpoint this connection was dialed to.
    endpoint: Endpoint,
    /// Channel for sending commands to the I/O loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// Caller-side view of the state; `Closed` is also implied by a dead loop.
    state: ConnectionState,
    /// Unsolicited frame handler (shared with the I/O loop).
    unsolicited: SharedHandler,
    /// When the connection was opened.
    created_at: Instant,
    /// When the last exchange completed.
    last_used: Instant,
}

impl Connection {
    /// Wraps an established stream and spawns its I/O loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(stream: TcpStream, endpoint: Endpoint, max_frame_size: usize) -> Self {
        let id = ConnectionId::next();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let unsolicited: SharedHandler = Arc::new(Mutex::new(None));

        let framed = Framed::new(stream, FrameCodec::new(max_frame_size));
        tokio::spawn(Self::run_io_loop(
            id,
            framed,
            command_rx,
            Arc::clone(&unsolicited),
        ));

        debug!(conn = %id, endpoint = %endpoint, "Connection opened");

        let now = Instant::now();
        Self {
            id,
            endpoint,
            command_tx,
            state: ConnectionState::Idle,
            unsolicited,
            created_at: now,
            last_used: now,
        }
    }

    /// Returns the connection identifier.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the remote endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        if self.command_tx.is_closed() {
            ConnectionState::Closed
        } else {
            self.state
        }
    }

    /// Returns `true` if the socket is open and no exchange is in flight.
    #[inline]
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state() == ConnectionState::Idle
    }

    /// Time since the connection was opened.
    #[inline]
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the last completed exchange (or since opening).
    #[inline]
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    /// Sets the handler for frames that arrive with no request outstanding.
    pub fn set_unsolicited_handler(&self, handler: UnsolicitedHandler) {
        *self.unsolicited.lock() = Some(Arc::from(handler));
    }

    /// Clears the unsolicited frame handler.
    pub fn clear_unsolicited_handler(&self) {
        *self.unsolicited.lock() = None;
    }

    /// Sends a request and waits for its reply with a relative timeout.
    ///
    /// # Errors
    ///
    /// See [`Connection::send`].
    pub async fn send_with_timeout(
        &mut self,
        payload: impl Into<Bytes>,
        request_timeout: Duration,
    ) -> Result<Bytes> {
        self.send(payload, Instant::now() + request_timeout).await
    }

    /// Sends a request and waits until its reply arrives or `deadline` passes.
    ///
    /// On timeout the connection is closed: a late reply would otherwise be
    /// read as the answer to the next request.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if no reply arrived before `deadline`
    /// - [`Error::ConnectionClosed`] if the socket closed or was reset
    /// - [`Error::FrameTooLarge`] / [`Error::Protocol`] on framing violations
    pub async fn send(&mut self, payload: impl Into<Bytes>, deadline: Instant) -> Result<Bytes> {
        match self.state() {
            ConnectionState::Idle => {}
            ConnectionState::Busy => {
                return Err(Error::protocol(format!(
                    "{} already has a request outstanding",
                    self.id
                )));
            }
            ConnectionState::Closed => return Err(Error::ConnectionClosed),
        }

        let started = Instant::now();
        let (reply_tx, reply_rx) = oneshot::channel();

        self.state = ConnectionState::Busy;
        let command = ConnectionCommand::Send {
            payload: payload.into(),
            deadline,
            reply_tx,
        };
        if self.command_tx.send(command).is_err() {
            self.state = ConnectionState::Closed;
            return Err(Error::ConnectionClosed);
        }

        match timeout_at(deadline, reply_rx).await {
            Ok(Ok(Ok(reply))) => {
                self.state = ConnectionState::Idle;
                self.last_used = Instant::now();
                Ok(reply)
            }
            Ok(Ok(Err(e))) => {
                self.state = ConnectionState::Closed;
                self.close();
                Err(e)
            }
            Ok(Err(dropped)) => {
                self.state = ConnectionState::Closed;
                Err(dropped.into())
            }
            Err(_) => {
                let waited = deadline.saturating_duration_since(started);
                warn!(conn = %self.id, waited_ms = waited.as_millis() as u64, "Reply timed out, closing connection");
                self.state = ConnectionState::Closed;
                self.close();
                Err(Error::timeout(
                    format!("reply on {}", self.id),
                    waited.as_millis() as u64,
                ))
            }
        }
    }

    /// Closes the socket. Idempotent.
    pub fn close(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
    }

    /// Returns a handle that can close this connection from elsewhere.
    pub(crate) fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            id: self.id,
            command_tx: self.command_tx.clone(),
        }
    }

    /// I/O loop that owns the socket.
    async fn run_io_loop(
        id: ConnectionId,
        framed: Framed<TcpStream, FrameCodec>,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        unsolicited: SharedHandler,
    ) {
        let (mut sink, mut frames) = framed.split::<Bytes>();
        let mut pending: Option<PendingRequest> = None;

        // Error to hand to the outstanding request, if any
        let failure: Option<Error> = loop {
            tokio::select! {
                // Inbound frames from the peer
                frame = frames.next() => {
                    match frame {
                        Some(Ok(payload)) => {
                            Self::handle_incoming_frame(id, payload, &mut pending, &unsolicited);
                        }

                        Some(Err(e)) => {
                            let e = classify(e);
                            warn!(conn = %id, error = %e, "Read failed");
                            break Some(e);
                        }

                        None => {
                            debug!(conn = %id, "Peer closed connection");
                            break None;
                        }
                    }
                }

                // Commands from the owner
                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send { payload, deadline, reply_tx }) => {
                            if pending.is_some() {
                                let _ = reply_tx.send(Err(Error::protocol(format!(
                                    "{id} already has a request outstanding"
                                ))));
                                continue;
                            }

                            // A peer that stops reading must not pin the socket open
                            let size = payload.len();
                            let write_started = Instant::now();
                            let written = tokio::select! {
                                written = timeout_at(deadline, sink.send(payload)) => written,
                                _ = command_rx.recv() => {
                                    debug!(conn = %id, size, "Closed during write");
                                    let _ = reply_tx.send(Err(Error::ConnectionClosed));
                                    break None;
                                }
                            };

                            let Ok(written) = written else {
                                warn!(conn = %id, size, "Write timed out, dropping socket");
                                let limit = deadline.saturating_duration_since(write_started);
                                let _ = reply_tx.send(Err(Error::timeout(
                                    format!("write on {id}"),
                                    limit.as_millis() as u64,
                                )));
                                break None;
                            };

                            match written {
                                Ok(()) => {
                                    trace!(conn = %id, size, "Request written");
                                    pending = Some(PendingRequest {
                                        reply_tx,
                                        sent_at: Instant::now(),
                                    });
                                }
                                Err(e) => {
                                    let e = classify(e);
                                    warn!(conn = %id, error = %e, "Write failed");
                                    let _ = reply_tx.send(Err(e));
                                    break None;
                                }
                            }
                        }

                        Some(ConnectionCommand::Shutdown) => {
                            debug!(conn = %id, "Shutdown command received");
                            let _ = sink.close().await;
                            break None;
                        }

                        None => {
                            debug!(conn = %id, "Owner dropped");
                            let _ = sink.close().await;
                            break None;
                        }
                    }
                }
            }
        };

        command_rx.close();

        // Fail the outstanding request
        if let Some(request) = pending.take() {
            let _ = request
                .reply_tx
                .send(Err(failure.unwrap_or(Error::ConnectionClosed)));
        }

        debug!(conn = %id, "I/O loop terminated");
    }

    /// Routes an inbound frame to the outstanding request or the handler.
    fn handle_incoming_frame(
        id: ConnectionId,
        payload: Bytes,
        pending: &mut Option<PendingRequest>,
        unsolicited: &SharedHandler,
    ) {
        if let Some(request) = pending.take() {
            trace!(
                conn = %id,
                size = payload.len(),
                elapsed_us = request.sent_at.elapsed().as_micros() as u64,
                "Reply received"
            );
            if request.reply_tx.send(Ok(payload)).is_err() {
                debug!(conn = %id, "Reply arrived after requester gave up");
            }
            return;
        }

        let handler = unsolicited.lock().clone();
        match handler {
            Some(handler) => handler(id, payload),
            None => warn!(conn = %id, size = payload.len(), "Dropping unsolicited frame"),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Turns raw socket errors into the crate's connection taxonomy.
pub(super) fn classify(err: Error) -> Error {
    match err {
        Error::Io(e) => Error::from_socket(e),
        other => other,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::net::TcpListener;

    const MAX: usize = 1024;

    /// Opens a client connection plus the raw framed server side.
    async fn pair() -> (Connection, Framed<TcpStream, FrameCodec>) {
        pair_with_max(MAX).await
    }

    async fn pair_with_max(max: usize) -> (Connection, Framed<TcpStream, FrameCodec>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let client = TcpStream::connect(addr).await.expect("connect");
        let (server, _) = listener.accept().await.expect("accept");

        let endpoint = Endpoint::new("127.0.0.1", addr.port());
        (
            Connection::open(client, endpoint, max),
            Framed::new(server, FrameCodec::new(max)),
        )
    }

    async fn wait_closed(conn: &Connection) {
        for _ in 0..100 {
            if conn.state() == ConnectionState::Closed {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("connection did not close");
    }

    #[tokio::test]
    async fn test_sequential_requests_get_their_own_replies() {
        let (mut conn, mut server) = pair().await;

        tokio::spawn(async move {
            while let Some(Ok(frame)) = server.next().await {
                let mut reply = b"re:".to_vec();
                reply.extend_from_slice(&frame);
                if server.send(Bytes::from(reply)).await.is_err() {
                    break;
                }
            }
        });

        let a = conn
            .send_with_timeout("A", Duration::from_secs(5))
            .await
            .expect("reply A");
        assert_eq!(a, Bytes::from_static(b"re:A"));
        assert_eq!(conn.state(), ConnectionState::Idle);

        let b = conn
            .send_with_timeout("B", Duration::from_secs(5))
            .await
            .expect("reply B");
        assert_eq!(b, Bytes::from_static(b"re:B"));
        assert!(conn.idle_for() <= conn.age());
    }

    #[tokio::test]
    async fn test_timeout_closes_connection() {
        let (mut conn, mut server) = pair().await;

        // Read the request but never answer
        let silent = tokio::spawn(async move {
            let _ = server.next().await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let err = conn
            .send_with_timeout("ping", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        wait_closed(&conn).await;
        assert!(!conn.is_healthy());

        silent.abort();
    }

    #[tokio::test]
    async fn test_stalled_write_drops_socket_at_deadline() {
        const LARGE: usize = 32 * 1024 * 1024;
        let (mut conn, server) = pair_with_max(LARGE).await;

        // The peer never reads, so the write cannot finish
        let err = conn
            .send_with_timeout(vec![0u8; LARGE], Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        // The I/O loop gives up on the write and exits
        for _ in 0..100 {
            if conn.command_tx.is_closed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(conn.command_tx.is_closed(), "I/O loop still blocked in write");

        // Draining the peer side reaches EOF (or a reset) well short of the full frame
        let mut raw = server.into_inner();
        let drained = tokio::time::timeout(Duration::from_secs(10), async move {
            use tokio::io::AsyncReadExt;
            let mut buf = vec![0u8; 64 * 1024];
            let mut total = 0usize;
            loop {
                match raw.read(&mut buf).await {
                    Ok(0) | Err(_) => break total,
                    Ok(n) => total += n,
                }
            }
        })
        .await
        .expect("socket left open");
        assert!(drained < LARGE + 4);
    }

    #[tokio::test]
    async fn test_peer_close_fails_pending_request() {
        let (mut conn, mut server) = pair().await;

        tokio::spawn(async move {
            let _ = server.next().await;
            drop(server);
        });

        let err = conn
            .send_with_timeout("ping", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_idle_connection_notices_peer_close() {
        let (conn, server) = pair().await;
        drop(server);
        wait_closed(&conn).await;
    }

    #[tokio::test]
    async fn test_oversize_request_closes_connection() {
        let (mut conn, _server) = pair().await;

        let err = conn
            .send_with_timeout(vec![0u8; MAX + 1], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FrameTooLarge { .. }));
        wait_closed(&conn).await;
    }

    #[tokio::test]
    async fn test_oversize_reply_is_protocol_error() {
        let (mut conn, server) = pair().await;
        let mut raw = server.into_inner();

        tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let mut buf = [0u8; 64];
            let _ = raw.read(&mut buf).await;
            let _ = raw.write_all(&((MAX as u32) + 1).to_be_bytes()).await;
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let err = conn
            .send_with_timeout("ping", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_protocol_error());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_unsolicited_frames_reach_handler() {
        let (conn, mut server) = pair().await;
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&seen);
        conn.set_unsolicited_handler(Box::new(move |_: ConnectionId, payload: Bytes| {
            assert_eq!(payload, Bytes::from_static(b"push"));
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        server.send(Bytes::from_static(b"push")).await.expect("push");
        server.send(Bytes::from_static(b"push")).await.expect("push");

        for _ in 0..100 {
            if seen.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(conn.state(), ConnectionState::Idle);

        // Without a handler the frame is dropped and the connection survives
        conn.clear_unsolicited_handler();
        server.send(Bytes::from_static(b"push")).await.expect("push");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(conn.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_handler_may_clear_itself() {
        let (mut conn, mut server) = pair().await;
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&seen);
        let slot = Arc::clone(&conn.unsolicited);
        conn.set_unsolicited_handler(Box::new(move |_: ConnectionId, _: Bytes| {
            counter.fetch_add(1, Ordering::SeqCst);
            *slot.lock() = None;
        }));

        server.send(Bytes::from_static(b"push")).await.expect("push");
        server.send(Bytes::from_static(b"push")).await.expect("push");

        // The loop is still serving requests afterwards
        tokio::spawn(async move {
            while let Some(Ok(frame)) = server.next().await {
                if server.send(frame).await.is_err() {
                    break;
                }
            }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let reply = conn
            .send_with_timeout("echo", Duration::from_secs(2))
            .await
            .expect("reply");
        assert_eq!(reply, Bytes::from_static(b"echo"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_send_on_closed_connection() {
        let (mut conn, _server) = pair().await;
        conn.close();
        wait_closed(&conn).await;

        let err = conn
            .send_with_timeout("late", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }
}
