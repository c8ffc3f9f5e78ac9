//! TCP Gateway - request/reply messaging over pooled TCP connections.
//!
//! Callers hand the gateway a payload and get the correlated reply back,
//! while the transport underneath is a bounded pool of persistent,
//! length-prefixed TCP connections shared across concurrent callers.
//!
//! # Architecture
//!
//! ```text
//! caller → OutboundGateway → ConnectionPool → Connection ─┐
//!                                                         │ TCP
//! caller ← OutboundGateway ← reply ←──────────────────────┤
//!                                                         │
//!          Listener → InboundGateway → Handler ───────────┘
//! ```
//!
//! Key design principles:
//!
//! - One request outstanding per connection; replies correlate by order
//! - A connection that timed out or failed is closed, never reused
//! - At most `capacity` live connections per pool, dials included
//! - Every blocking point is bounded by a deadline
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bytes::Bytes;
//! use tcp_gateway::{
//!     BoxError, ConnectionPool, Endpoint, GatewayOptions, InboundGateway, Listener,
//!     OutboundGateway, PoolOptions, Result, ServerOptions, handler_fn,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Server: uppercase every request
//!     let inbound = InboundGateway::new(
//!         handler_fn(|request: Bytes| async move {
//!             Ok::<_, BoxError>(Bytes::from(request.to_ascii_uppercase()))
//!         }),
//!         ServerOptions::new(),
//!     )?;
//!     let listener = Listener::bind("127.0.0.1:0", inbound).await?;
//!
//!     // Client: pool of two connections
//!     let pool = ConnectionPool::connect(
//!         Endpoint::new("127.0.0.1", listener.port()),
//!         PoolOptions::new().with_capacity(2),
//!     )?;
//!     let gateway = OutboundGateway::new(Arc::new(pool), GatewayOptions::new())?;
//!
//!     let reply = gateway.send("hello").await?;
//!     assert_eq!(reply, Bytes::from_static(b"HELLO"));
//!
//!     listener.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Option structs and deployment settings |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`gateway`] | [`OutboundGateway`], [`InboundGateway`], [`Handler`] |
//! | [`identifiers`] | [`ConnectionId`] |
//! | [`protocol`] | Frame codec and the sample JSON message |
//! | [`transport`] | Connections, pool, listener |

// ============================================================================
// Modules
// ============================================================================

/// Runtime options and deployment settings.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Request/reply gateways.
///
/// - [`OutboundGateway`] - client façade over a pool
/// - [`InboundGateway`] - server loop around a [`Handler`]
pub mod gateway;

/// Connection identifiers.
pub mod identifiers;

/// Wire framing and message payloads.
pub mod protocol;

/// TCP transport: connections, pooling, listening.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Configuration
pub use config::{
    AcquirePolicy, ClientConfig, GatewayOptions, PoolOptions, ServerConfig, ServerOptions,
};

// Error types
pub use error::{BoxError, Error, Result};

// Gateways
pub use gateway::{FnHandler, Handler, InboundGateway, OutboundGateway, handler_fn};

// Identifier types
pub use identifiers::ConnectionId;

// Protocol types
pub use protocol::{DEFAULT_MAX_FRAME_SIZE, FrameCodec, MessageDto, encode_frame};

// Transport types
pub use transport::{
    Connection, ConnectionPool, ConnectionState, Dialer, Endpoint, Listener, PoolStatus,
    PooledConnection, ServerConnection, ServerState, TcpDialer,
};
