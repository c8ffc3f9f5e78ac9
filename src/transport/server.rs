//! TCP listener and server-side connections.
//!
//! # Connection Flow
//!
//! 1. `Listener::bind` binds the socket and spawns the accept loop
//! 2. Each accepted stream becomes a [`ServerConnection`] on its own task
//! 3. The [`InboundGateway`] reads one request, runs the handler, writes
//!    the reply, and repeats until EOF, error, or shutdown
//! 4. `Listener::shutdown` stops accepting and tells connection tasks to
//!    finish their current exchange
//!
//! # State Machine
//!
//! ```text
//! Accepted → next_request() → Handling → reply() → Accepted
//!     └──────────── EOF / error / shutdown ────────────→ Closed
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::gateway::InboundGateway;
use crate::identifiers::ConnectionId;
use crate::protocol::FrameCodec;

use super::connection::classify;

// ============================================================================
// Constants
// ============================================================================

/// Pause after a failed accept (e.g. file descriptor exhaustion).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

// ============================================================================
// ServerState
// ============================================================================

/// Lifecycle state of a server-side connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Waiting for the next request frame.
    Accepted,
    /// A request was read and its reply has not been written.
    Handling,
    /// Terminal.
    Closed,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Accepted => "accepted",
            Self::Handling => "handling",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// ServerConnection
// ============================================================================

/// One accepted TCP stream, read and written in strict request/reply order.
pub struct ServerConnection {
    id: ConnectionId,
    peer: SocketAddr,
    framed: Framed<TcpStream, FrameCodec>,
    state: ServerState,
}

impl ServerConnection {
    /// Wraps an accepted stream.
    #[must_use]
    pub fn new(stream: TcpStream, peer: SocketAddr, max_frame_size: usize) -> Self {
        Self {
            id: ConnectionId::next(),
            peer,
            framed: Framed::new(stream, FrameCodec::new(max_frame_size)),
            state: ServerState::Accepted,
        }
    }

    /// Returns the connection identifier.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the remote address.
    #[inline]
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Reads the next request frame.
    ///
    /// Returns `Ok(None)` once the peer has closed the stream. Cancel-safe:
    /// a partially received frame stays buffered.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if the previous request has not been answered
    /// - [`Error::FrameTooLarge`] / [`Error::ConnectionClosed`] on a bad stream
    pub async fn next_request(&mut self) -> Result<Option<Bytes>> {
        match self.state {
            ServerState::Accepted => {}
            ServerState::Handling => {
                return Err(Error::protocol(format!(
                    "{} has a request awaiting its reply",
                    self.id
                )));
            }
            ServerState::Closed => return Ok(None),
        }

        match self.framed.next().await {
            Some(Ok(request)) => {
                trace!(conn = %self.id, size = request.len(), "Request received");
                self.state = ServerState::Handling;
                Ok(Some(request))
            }
            Some(Err(e)) => {
                self.state = ServerState::Closed;
                Err(classify(e))
            }
            None => {
                trace!(conn = %self.id, "Peer finished sending");
                self.state = ServerState::Closed;
                Ok(None)
            }
        }
    }

    /// Writes the reply to the request last returned by `next_request`.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if no request is awaiting a reply
    /// - [`Error::FrameTooLarge`] if the reply exceeds the frame limit
    /// - [`Error::ConnectionClosed`] if the peer went away
    pub async fn reply(&mut self, payload: impl Into<Bytes>) -> Result<()> {
        if self.state != ServerState::Handling {
            return Err(Error::protocol(format!(
                "{} has no request awaiting a reply",
                self.id
            )));
        }

        let payload: Bytes = payload.into();
        let size = payload.len();
        match self.framed.send(payload).await {
            Ok(()) => {
                trace!(conn = %self.id, size, "Reply written");
                self.state = ServerState::Accepted;
                Ok(())
            }
            Err(e) => {
                self.state = ServerState::Closed;
                Err(classify(e))
            }
        }
    }

    /// Shuts the write half down and drops the socket.
    pub async fn close(mut self) {
        self.state = ServerState::Closed;
        if let Err(e) = self.framed.get_mut().shutdown().await {
            trace!(conn = %self.id, error = %e, "Shutdown on closed socket");
        }
    }
}

impl fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConnection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Listener
// ============================================================================

/// Accepts TCP connections and serves each one through an [`InboundGateway`].
///
/// # Example
///
/// ```ignore
/// let gateway = InboundGateway::new(
///     handler_fn(|request: Bytes| async move { Ok(request.to_ascii_uppercase().into()) }),
///     ServerOptions::new(),
/// )?;
/// let listener = Listener::bind("127.0.0.1:0", gateway).await?;
/// println!("listening on {}", listener.port());
///
/// listener.shutdown().await;
/// ```
pub struct Listener {
    local_addr: SocketAddr,
    active: Arc<AtomicUsize>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Listener {
    /// Binds to `addr` and starts accepting.
    ///
    /// Use port 0 to let the OS pick a free port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(addr: impl ToSocketAddrs, gateway: InboundGateway) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let active = Arc::new(AtomicUsize::new(0));

        let accept_task = tokio::spawn(Self::accept_loop(
            listener,
            Arc::new(gateway),
            shutdown_rx,
            Arc::clone(&active),
        ));

        info!(addr = %local_addr, "Listener bound");

        Ok(Self {
            local_addr,
            active,
            shutdown_tx,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the bound port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Returns the number of connections currently being served.
    #[inline]
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Stops accepting and signals every connection task to close after its
    /// current exchange. Waits for the accept loop to exit.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        let task = self.accept_task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            error!(error = %e, "Accept loop ended abnormally");
        }
    }

    /// Accept loop. One task per accepted connection.
    async fn accept_loop(
        listener: TcpListener,
        gateway: Arc<InboundGateway>,
        mut shutdown_rx: watch::Receiver<bool>,
        active: Arc<AtomicUsize>,
    ) {
        let max_frame_size = gateway.options().max_frame_size;

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => break,

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                warn!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                            }

                            let connection = ServerConnection::new(stream, peer, max_frame_size);
                            debug!(conn = %connection.id(), peer = %peer, "Accepted connection");

                            let guard = ActiveGuard::enter(&active);
                            let gateway = Arc::clone(&gateway);
                            let shutdown = shutdown_rx.clone();

                            // A panicking handler only unwinds this task
                            tokio::spawn(async move {
                                let _guard = guard;
                                gateway.serve(connection, shutdown).await;
                            });
                        }

                        Err(e) => {
                            error!(error = %e, "Accept failed");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                }
            }
        }

        info!(addr = ?listener.local_addr().ok(), "Listener stopped accepting");
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("local_addr", &self.local_addr)
            .field("active", &self.active_connections())
            .finish_non_exhaustive()
    }
}

/// Counts a connection task as active until dropped.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(active))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Tests
// ============================================================================
