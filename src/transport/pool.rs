//! Bounded caching pool of client connections to one endpoint.
//!
//! The pool lends out [`Connection`]s for one request/reply cycle at a time
//! and takes them back afterwards. Connections are dialed lazily, so the
//! pool can be built before the remote endpoint is reachable.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               ConnectionPool                 │
//! │  Mutex<PoolState>                            │
//! │    idle:       [conn-3, conn-7]              │
//! │    borrowed:   {conn-5 → CloseHandle}        │
//! │    connecting: 1                             │
//! │  Notify  ← waiters parked at capacity        │
//! │  Dialer  → new Connection on demand          │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! `idle + borrowed + connecting` never exceeds the capacity: a dial slot
//! is reserved under the lock before the TCP connect starts.
//!
//! # Lifecycle
//!
//! 1. `acquire` - reuse an idle connection, dial a new one, or wait/fail
//! 2. `PooledConnection` - exclusive borrow, derefs to [`Connection`]
//! 3. drop / `release` - back to idle if the exchange completed cleanly
//! 4. `discard` - close instead of returning (timeouts, errors)
//! 5. `close` - close everything and reject further acquires

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info, trace, warn};

use crate::config::{AcquirePolicy, PoolOptions};
use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;

use super::connection::CloseHandle;
use super::{Connection, ConnectionState, Endpoint};

// ============================================================================
// Constants
// ============================================================================

/// Lower bound on the idle reaper period.
const MIN_REAP_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Dialer
// ============================================================================

/// Strategy for opening new connections to the pool's endpoint.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Endpoint the dialer connects to.
    fn endpoint(&self) -> &Endpoint;

    /// Opens a new connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if the connection cannot be established.
    async fn dial(&self) -> Result<Connection>;

    /// Decides whether an idle connection may be handed out again.
    ///
    /// Called under the pool lock; must not block.
    fn healthcheck(&self, connection: &Connection) -> bool {
        connection.is_healthy()
    }
}

/// Shared callback installed on every connection a [`TcpDialer`] opens.
pub type SharedUnsolicitedHandler = Arc<dyn Fn(ConnectionId, Bytes) + Send + Sync>;

/// Plain TCP dialer.
pub struct TcpDialer {
    endpoint: Endpoint,
    connect_timeout: Duration,
    max_frame_size: usize,
    unsolicited: Option<SharedUnsolicitedHandler>,
}

impl TcpDialer {
    /// Creates a dialer for `endpoint` using the pool's connect timeout and
    /// frame size limit.
    #[must_use]
    pub fn new(endpoint: Endpoint, options: &PoolOptions) -> Self {
        Self {
            endpoint,
            connect_timeout: options.connect_timeout,
            max_frame_size: options.max_frame_size,
            unsolicited: None,
        }
    }

    /// Installs `handler` on every connection this dialer opens.
    #[must_use]
    pub fn with_unsolicited_handler(mut self, handler: SharedUnsolicitedHandler) -> Self {
        self.unsolicited = Some(handler);
        self
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn dial(&self) -> Result<Connection> {
        let target = (self.endpoint.host(), self.endpoint.port());

        let stream = match timeout(self.connect_timeout, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(Error::connect(self.endpoint.clone(), e.to_string())),
            Err(_) => {
                return Err(Error::connect(
                    self.endpoint.clone(),
                    format!(
                        "connect timed out after {}ms",
                        self.connect_timeout.as_millis()
                    ),
                ));
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!(endpoint = %self.endpoint, error = %e, "Failed to set TCP_NODELAY");
        }

        let connection = Connection::open(stream, self.endpoint.clone(), self.max_frame_size);
        if let Some(handler) = &self.unsolicited {
            let handler = Arc::clone(handler);
            connection.set_unsolicited_handler(Box::new(move |id: ConnectionId, payload: Bytes| {
                handler(id, payload);
            }));
        }

        Ok(connection)
    }
}

// ============================================================================
// PoolStatus
// ============================================================================

/// Point-in-time snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Maximum live connections.
    pub capacity: usize,
    /// Connections parked in the pool.
    pub idle: usize,
    /// Connections lent out to callers.
    pub busy: usize,
    /// Dials in progress.
    pub connecting: usize,
    /// Whether `close` was called.
    pub closed: bool,
}

impl PoolStatus {
    /// Live connections, counting in-progress dials.
    #[inline]
    #[must_use]
    pub const fn live(&self) -> usize {
        self.idle + self.busy + self.connecting
    }
}

// ============================================================================
// Internal State
// ============================================================================

/// Idle connection with the time it was parked.
struct IdleConnection {
    connection: Connection,
    since: Instant,
}

/// Mutable pool bookkeeping. Only touched under `PoolShared::state`.
#[derive(Default)]
struct PoolState {
    idle: VecDeque<IdleConnection>,
    borrowed: FxHashMap<ConnectionId, CloseHandle>,
    connecting: usize,
    closed: bool,
}

impl PoolState {
    fn live(&self) -> usize {
        self.idle.len() + self.borrowed.len() + self.connecting
    }
}

/// Outcome of one checkout attempt.
enum Checkout {
    Ready(Connection),
    Dial,
    Full,
}

/// State shared between the pool handle, borrowed connections, and the reaper.
struct PoolShared {
    dialer: Box<dyn Dialer>,
    options: PoolOptions,
    state: Mutex<PoolState>,
    available: Notify,
}

impl PoolShared {
    /// Takes a reusable idle connection or reserves a dial slot.
    fn checkout(&self) -> Result<Checkout> {
        let mut evicted = Vec::new();

        let outcome = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::PoolClosed);
            }

            let mut ready = None;
            while let Some(entry) = state.idle.pop_back() {
                if self.is_reusable(&entry) {
                    let id = entry.connection.id();
                    state.borrowed.insert(id, entry.connection.close_handle());
                    ready = Some(entry.connection);
                    break;
                }
                evicted.push(entry);
            }

            match ready {
                Some(connection) => Checkout::Ready(connection),
                None if state.live() < self.options.capacity => {
                    state.connecting += 1;
                    Checkout::Dial
                }
                None => Checkout::Full,
            }
        };

        for entry in evicted {
            debug!(conn = %entry.connection.id(), state = %entry.connection.state(), "Evicted stale idle connection");
        }

        Ok(outcome)
    }

    fn is_reusable(&self, entry: &IdleConnection) -> bool {
        let fresh = self
            .options
            .idle_timeout
            .is_none_or(|limit| entry.since.elapsed() < limit);
        fresh && self.dialer.healthcheck(&entry.connection)
    }

    /// Takes a borrowed connection back.
    fn check_in(&self, connection: Connection, discard: bool) {
        let id = connection.id();
        let state_before = connection.state();
        let reusable = !discard && state_before == ConnectionState::Idle;

        let rejected = {
            let mut state = self.state.lock();
            state.borrowed.remove(&id);
            if reusable && !state.closed {
                state.idle.push_back(IdleConnection {
                    connection,
                    since: Instant::now(),
                });
                None
            } else {
                Some(connection)
            }
        };

        self.available.notify_one();

        match rejected {
            None => trace!(conn = %id, "Connection returned to pool"),
            Some(connection) => {
                debug!(conn = %id, state = %state_before, discard, "Closing returned connection");
                drop(connection);
            }
        }
    }

    /// Removes stale and unhealthy idle connections.
    fn evict_idle(&self) -> usize {
        let evicted: Vec<IdleConnection> = {
            let mut state = self.state.lock();
            let (keep, evict): (VecDeque<_>, VecDeque<_>) = state
                .idle
                .drain(..)
                .partition(|entry| self.is_reusable(entry));
            state.idle = keep;
            evict.into_iter().collect()
        };

        for entry in &evicted {
            debug!(conn = %entry.connection.id(), state = %entry.connection.state(), "Evicted idle connection");
            self.available.notify_one();
        }

        evicted.len()
    }
}

/// Dial slot reserved under the lock. Released on drop unless committed,
/// so a failed or cancelled dial never leaks capacity.
struct DialReservation {
    shared: Arc<PoolShared>,
    armed: bool,
}

impl DialReservation {
    /// Converts the slot into a borrowed connection.
    fn commit(mut self, connection: Connection) -> Result<PooledConnection> {
        self.armed = false;

        let accepted = {
            let mut state = self.shared.state.lock();
            state.connecting -= 1;
            if state.closed {
                false
            } else {
                state
                    .borrowed
                    .insert(connection.id(), connection.close_handle());
                true
            }
        };

        if !accepted {
            self.shared.available.notify_one();
            return Err(Error::PoolClosed);
        }

        Ok(PooledConnection::new(connection, &self.shared))
    }
}

impl Drop for DialReservation {
    fn drop(&mut self) {
        if self.armed {
            self.shared.state.lock().connecting -= 1;
            self.shared.available.notify_one();
        }
    }
}

// ============================================================================
// ConnectionPool
// ============================================================================

/// Bounded pool of connections to a single endpoint.
///
/// Thread-safe; share it behind an `Arc`. Dropping the pool closes it.
///
/// # Example
///
/// ```ignore
/// let pool = ConnectionPool::connect(Endpoint::new("127.0.0.1", 9000), PoolOptions::new())?;
///
/// let mut conn = pool.acquire_timeout(Duration::from_secs(5)).await?;
/// let reply = conn.send_with_timeout("ping", Duration::from_secs(5)).await?;
/// conn.release();
/// ```
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

// ============================================================================
// ConnectionPool - Constructor
// ============================================================================

impl ConnectionPool {
    /// Creates a pool that dials through `dialer`.
    ///
    /// No connection is opened until the first `acquire`. When an idle
    /// timeout is configured, a reaper task is spawned on the current
    /// runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if `options` are invalid
    /// - [`Error::Config`] if called outside a tokio runtime
    pub fn new(dialer: impl Dialer, options: PoolOptions) -> Result<Self> {
        options.validate()?;
        let runtime = Handle::try_current()
            .map_err(|_| Error::config("ConnectionPool must be created inside a tokio runtime"))?;

        let shared = Arc::new(PoolShared {
            dialer: Box::new(dialer),
            options,
            state: Mutex::new(PoolState::default()),
            available: Notify::new(),
        });

        if let Some(idle_timeout) = shared.options.idle_timeout {
            let period = (idle_timeout / 2).max(MIN_REAP_INTERVAL);
            runtime.spawn(Self::reap_idle(Arc::downgrade(&shared), period));
        }

        info!(
            endpoint = %shared.dialer.endpoint(),
            capacity = shared.options.capacity,
            policy = ?shared.options.acquire_policy,
            "ConnectionPool created"
        );

        Ok(Self { shared })
    }

    /// Creates a pool of plain TCP connections to `endpoint`.
    ///
    /// # Errors
    ///
    /// See [`ConnectionPool::new`].
    pub fn connect(endpoint: Endpoint, options: PoolOptions) -> Result<Self> {
        let dialer = TcpDialer::new(endpoint, &options);
        Self::new(dialer, options)
    }
}

// ============================================================================
// ConnectionPool - Public API
// ============================================================================

impl ConnectionPool {
    /// Returns the endpoint this pool connects to.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        self.shared.dialer.endpoint()
    }

    /// Returns the pool options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &PoolOptions {
        &self.shared.options
    }

    /// Returns a snapshot of pool occupancy.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.shared.state.lock();
        PoolStatus {
            capacity: self.shared.options.capacity,
            idle: state.idle.len(),
            busy: state.borrowed.len(),
            connecting: state.connecting,
            closed: state.closed,
        }
    }

    /// Returns the number of live connections, counting in-progress dials.
    #[inline]
    #[must_use]
    pub fn live(&self) -> usize {
        self.shared.state.lock().live()
    }

    /// Borrows a connection, waiting at most `wait`.
    ///
    /// # Errors
    ///
    /// See [`ConnectionPool::acquire`].
    pub async fn acquire_timeout(&self, wait: Duration) -> Result<PooledConnection> {
        self.acquire(Instant::now() + wait).await
    }

    /// Borrows a connection for one request/reply cycle.
    ///
    /// Reuses the most recently returned healthy idle connection, dials a
    /// new one if below capacity, and otherwise waits for a release until
    /// `deadline` or fails fast, per [`AcquirePolicy`].
    ///
    /// # Errors
    ///
    /// - [`Error::PoolExhausted`] at capacity under [`AcquirePolicy::FailFast`]
    /// - [`Error::Timeout`] if `deadline` passes first
    /// - [`Error::Connect`] if a new connection cannot be dialed
    /// - [`Error::PoolClosed`] once the pool is closed
    pub async fn acquire(&self, deadline: Instant) -> Result<PooledConnection> {
        let started = Instant::now();

        loop {
            // Register interest before checking so a release in between is not missed
            let notified = self.shared.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.shared.checkout()? {
                Checkout::Ready(connection) => {
                    trace!(conn = %connection.id(), "Reusing idle connection");
                    return Ok(PooledConnection::new(connection, &self.shared));
                }
                Checkout::Dial => return self.dial(deadline, started).await,
                Checkout::Full => {}
            }

            if self.shared.options.acquire_policy == AcquirePolicy::FailFast {
                debug!(capacity = self.shared.options.capacity, "Pool exhausted");
                return Err(Error::pool_exhausted(self.shared.options.capacity));
            }

            if timeout_at(deadline, notified).await.is_err() {
                let waited = deadline.saturating_duration_since(started);
                debug!(waited_ms = waited.as_millis() as u64, "Timed out waiting for a pooled connection");
                return Err(Error::timeout("pool acquire", waited.as_millis() as u64));
            }
        }
    }

    /// Evicts idle connections past the idle timeout or failing the health
    /// check. Returns how many were closed.
    pub fn evict_idle(&self) -> usize {
        self.shared.evict_idle()
    }

    /// Closes the pool.
    ///
    /// Idle connections are closed, borrowed ones are force-closed (their
    /// pending exchange fails with [`Error::ConnectionClosed`]), waiters are
    /// woken with [`Error::PoolClosed`], and further acquires are rejected.
    /// Idempotent.
    pub fn close(&self) {
        let (idle, borrowed) = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;

            let idle: Vec<_> = state.idle.drain(..).collect();
            let borrowed: Vec<_> = state.borrowed.values().cloned().collect();
            (idle, borrowed)
        };

        info!(
            endpoint = %self.endpoint(),
            idle = idle.len(),
            borrowed = borrowed.len(),
            "ConnectionPool closing"
        );

        for handle in borrowed {
            handle.close();
        }
        drop(idle);

        self.shared.available.notify_waiters();
    }
}

// ============================================================================
// ConnectionPool - Internals
// ============================================================================

impl ConnectionPool {
    /// Dials into a reserved slot.
    async fn dial(&self, deadline: Instant, started: Instant) -> Result<PooledConnection> {
        let reservation = DialReservation {
            shared: Arc::clone(&self.shared),
            armed: true,
        };

        let endpoint = self.endpoint();
        let dialed = match timeout_at(deadline, self.shared.dialer.dial()).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(
                format!("connect to {endpoint}"),
                deadline.saturating_duration_since(started).as_millis() as u64,
            )),
        };

        match dialed {
            Ok(connection) => {
                debug!(conn = %connection.id(), endpoint = %endpoint, "Dialed new pooled connection");
                reservation.commit(connection)
            }
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Dial failed");
                Err(e)
            }
        }
    }

    /// Background task that evicts idle connections until the pool is gone.
    async fn reap_idle(shared: Weak<PoolShared>, period: Duration) {
        loop {
            tokio::time::sleep(period).await;

            let Some(shared) = shared.upgrade() else {
                break;
            };
            if shared.state.lock().closed {
                break;
            }

            let evicted = shared.evict_idle();
            if evicted > 0 {
                debug!(evicted, "Idle reaper pass");
            }
        }

        trace!("Idle reaper stopped");
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// PooledConnection
// ============================================================================

/// Exclusive borrow of a pooled [`Connection`].
///
/// Dropping it returns the connection to the pool if it is idle (the last
/// exchange completed) and closes it otherwise.
pub struct PooledConnection {
    /// Always `Some` until drop.
    connection: Option<Connection>,
    pool: Weak<PoolShared>,
    discard: bool,
}

impl PooledConnection {
    fn new(connection: Connection, shared: &Arc<PoolShared>) -> Self {
        Self {
            connection: Some(connection),
            pool: Arc::downgrade(shared),
            discard: false,
        }
    }

    /// Returns the connection to the pool.
    pub fn release(self) {
        drop(self);
    }

    /// Closes the connection and frees its pool slot.
    pub fn discard(mut self) {
        self.discard = true;
        drop(self);
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.connection
            .as_ref()
            .expect("pooled connection is present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.connection
            .as_mut()
            .expect("pooled connection is present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        match self.pool.upgrade() {
            Some(shared) => shared.check_in(connection, self.discard),
            None => drop(connection),
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("connection", &self.connection)
            .field("discard", &self.discard)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_util::codec::Framed;

    use crate::protocol::FrameCodec;

    /// Echo server speaking the frame protocol.
    async fn echo_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut framed = Framed::new(stream, FrameCodec::default());
                    while let Some(Ok(frame)) = framed.next().await {
                        if framed.send(frame).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        addr
    }

    /// Dialer that counts dials on top of a `TcpDialer`.
    struct CountingDialer {
        inner: TcpDialer,
        dials: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Dialer for CountingDialer {
        fn endpoint(&self) -> &Endpoint {
            self.inner.endpoint()
        }

        async fn dial(&self) -> Result<Connection> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            self.inner.dial().await
        }
    }

    /// Dialer whose connect never completes.
    struct StalledDialer(Endpoint);

    #[async_trait]
    impl Dialer for StalledDialer {
        fn endpoint(&self) -> &Endpoint {
            &self.0
        }

        async fn dial(&self) -> Result<Connection> {
            std::future::pending().await
        }
    }

    fn counting_pool(addr: SocketAddr, options: PoolOptions) -> (ConnectionPool, Arc<AtomicUsize>) {
        let dials = Arc::new(AtomicUsize::new(0));
        let dialer = CountingDialer {
            inner: TcpDialer::new(Endpoint::new("127.0.0.1", addr.port()), &options),
            dials: Arc::clone(&dials),
        };
        (ConnectionPool::new(dialer, options).expect("pool"), dials)
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_new_outside_runtime_is_config_error() {
        let result = ConnectionPool::connect(Endpoint::new("127.0.0.1", 1), PoolOptions::new());
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_lazy_connect_and_connect_error() {
        // Grab a free port, then close it so nothing listens there
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
            listener.local_addr().expect("addr")
        };

        let pool = ConnectionPool::connect(
            Endpoint::new("127.0.0.1", addr.port()),
            PoolOptions::new().with_capacity(2),
        )
        .expect("pool creation does not dial");
        assert_eq!(pool.live(), 0);

        let err = pool.acquire_timeout(WAIT).await.unwrap_err();
        assert!(matches!(err, Error::Connect { .. }));
        assert_eq!(pool.live(), 0);
    }

    #[tokio::test]
    async fn test_released_connection_is_reused() {
        let addr = echo_server().await;
        let (pool, dials) = counting_pool(addr, PoolOptions::new().with_capacity(2));

        let mut conn = pool.acquire_timeout(WAIT).await.expect("acquire");
        let first_id = conn.id();
        let reply = conn.send_with_timeout("hi", WAIT).await.expect("reply");
        assert_eq!(reply, Bytes::from_static(b"hi"));
        assert_eq!(pool.status().busy, 1);
        conn.release();

        assert_eq!(pool.status().idle, 1);
        let conn = pool.acquire_timeout(WAIT).await.expect("acquire");
        assert_eq!(conn.id(), first_id);
        assert_eq!(dials.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fail_fast_at_capacity() {
        let addr = echo_server().await;
        let (pool, _) = counting_pool(
            addr,
            PoolOptions::new()
                .with_capacity(1)
                .with_acquire_policy(AcquirePolicy::FailFast),
        );

        let _held = pool.acquire_timeout(WAIT).await.expect("acquire");
        let err = pool.acquire_timeout(WAIT).await.unwrap_err();
        assert!(matches!(err, Error::PoolExhausted { capacity: 1 }));
    }

    #[tokio::test]
    async fn test_waiter_receives_released_connection() {
        let addr = echo_server().await;
        let (pool, dials) = counting_pool(addr, PoolOptions::new().with_capacity(1));
        let pool = Arc::new(pool);

        let held = pool.acquire_timeout(WAIT).await.expect("acquire");
        let held_id = held.id();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire_timeout(WAIT).await.map(|c| c.id()) })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        held.release();

        let id = waiter.await.expect("join").expect("acquire");
        assert_eq!(id, held_id);
        assert_eq!(dials.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let addr = echo_server().await;
        let (pool, _) = counting_pool(addr, PoolOptions::new().with_capacity(1));

        let _held = pool.acquire_timeout(WAIT).await.expect("acquire");
        let err = pool
            .acquire_timeout(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_discarded_connection_is_replaced() {
        let addr = echo_server().await;
        let (pool, dials) = counting_pool(addr, PoolOptions::new().with_capacity(1));

        let conn = pool.acquire_timeout(WAIT).await.expect("acquire");
        let first_id = conn.id();
        conn.discard();
        assert_eq!(pool.live(), 0);

        let conn = pool.acquire_timeout(WAIT).await.expect("acquire");
        assert_ne!(conn.id(), first_id);
        assert_eq!(dials.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_busy_connection_is_not_returned() {
        let addr = echo_server().await;
        let (pool, _) = counting_pool(addr, PoolOptions::new().with_capacity(1));

        let mut conn = pool.acquire_timeout(WAIT).await.expect("acquire");
        {
            // Abandon an exchange mid-flight
            let send = conn.send_with_timeout("x", WAIT);
            tokio::pin!(send);
            let _ = futures_util::poll!(send.as_mut());
        }
        assert_eq!(conn.state(), ConnectionState::Busy);
        drop(conn);

        let status = pool.status();
        assert_eq!(status.idle, 0);
        assert_eq!(status.live(), 0);
    }

    #[tokio::test]
    async fn test_idle_connections_are_reaped() {
        let addr = echo_server().await;
        let (pool, _) = counting_pool(
            addr,
            PoolOptions::new()
                .with_capacity(2)
                .with_idle_timeout(Duration::from_millis(40)),
        );

        let conn = pool.acquire_timeout(WAIT).await.expect("acquire");
        let first_id = conn.id();
        conn.release();
        assert_eq!(pool.status().idle, 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(pool.status().idle, 0);

        let conn = pool.acquire_timeout(WAIT).await.expect("acquire");
        assert_ne!(conn.id(), first_id);
    }

    #[tokio::test]
    async fn test_evict_idle_keeps_healthy_connections() {
        let addr = echo_server().await;
        let (pool, _) = counting_pool(
            addr,
            PoolOptions::new().with_capacity(2).without_idle_timeout(),
        );

        let a = pool.acquire_timeout(WAIT).await.expect("acquire");
        let b = pool.acquire_timeout(WAIT).await.expect("acquire");
        let (a_id, b_id) = (a.id(), b.id());
        a.release();
        b.release();

        assert_eq!(pool.evict_idle(), 0);
        assert_eq!(pool.status().idle, 2);

        // Most recently released first
        let reused = pool.acquire_timeout(WAIT).await.expect("acquire");
        assert_eq!(reused.id(), b_id);
        assert_ne!(reused.id(), a_id);
    }

    #[tokio::test]
    async fn test_half_closed_idle_connection_is_evicted() {
        // Server that hangs up right after accepting
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });

        let (pool, _) = counting_pool(addr, PoolOptions::new().without_idle_timeout());
        let conn = pool.acquire_timeout(WAIT).await.expect("acquire");
        conn.release();

        let mut evicted = 0;
        for _ in 0..100 {
            evicted += pool.evict_idle();
            if evicted > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(evicted, 1);
        assert_eq!(pool.live(), 0);
    }

    #[tokio::test]
    async fn test_stalled_dial_releases_slot_on_timeout() {
        let pool = ConnectionPool::new(
            StalledDialer(Endpoint::new("127.0.0.1", 1)),
            PoolOptions::new().with_capacity(1),
        )
        .expect("pool");

        let err = pool
            .acquire_timeout(Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(pool.status().connecting, 0);
    }

    #[tokio::test]
    async fn test_dialer_installs_unsolicited_handler() {
        // Server that pushes one frame right after accepting
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let mut framed = Framed::new(stream, FrameCodec::default());
                let _ = framed.send(Bytes::from_static(b"hello")).await;
                tokio::spawn(async move { while framed.next().await.is_some() {} });
            }
        });

        let pushed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pushed);
        let options = PoolOptions::new().with_capacity(1);
        let dialer = TcpDialer::new(Endpoint::new("127.0.0.1", addr.port()), &options)
            .with_unsolicited_handler(Arc::new(move |_: ConnectionId, payload: Bytes| {
                assert_eq!(payload, Bytes::from_static(b"hello"));
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        let pool = ConnectionPool::new(dialer, options).expect("pool");

        let conn = pool.acquire_timeout(WAIT).await.expect("acquire");
        for _ in 0..100 {
            if pushed.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(pushed.load(Ordering::SeqCst), 1);
        assert!(conn.is_healthy());
    }

    #[tokio::test]
    async fn test_close_rejects_and_wakes_waiters() {
        let addr = echo_server().await;
        let (pool, _) = counting_pool(addr, PoolOptions::new().with_capacity(1));
        let pool = Arc::new(pool);

        let held = pool.acquire_timeout(WAIT).await.expect("acquire");

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire_timeout(WAIT).await.map(|c| c.id()) })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        pool.close();

        let err = waiter.await.expect("join").unwrap_err();
        assert!(matches!(err, Error::PoolClosed));

        // The borrowed connection was force-closed
        for _ in 0..100 {
            if held.state() == ConnectionState::Closed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(held.state(), ConnectionState::Closed);
        held.release();

        assert!(matches!(
            pool.acquire_timeout(WAIT).await.unwrap_err(),
            Error::PoolClosed
        ));
        assert_eq!(pool.live(), 0);
        assert!(pool.status().closed);
    }
}
