//! TCP transport layer.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐                       ┌──────────────────────┐
//! │  ConnectionPool      │                       │  Listener            │
//! │   └ Connection ──────┼──── length-prefixed ──┼─► ServerConnection   │
//! │      (I/O task)      │        frames         │     (per-conn task)  │
//! └──────────────────────┘                       └──────────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `endpoint` | Remote host/port identity |
//! | `connection` | Client connection and its I/O loop |
//! | `pool` | Bounded connection pool and dial strategy |
//! | `server` | Listener and server-side connections |

// ============================================================================
// Submodules
// ============================================================================

/// Client connection and I/O loop.
pub mod connection;

/// Remote endpoint identity.
pub mod endpoint;

/// Bounded connection pool.
pub mod pool;

/// TCP listener and server connections.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connection, ConnectionState, UnsolicitedHandler};
pub use endpoint::Endpoint;
pub use pool::{
    ConnectionPool, Dialer, PoolStatus, PooledConnection, SharedUnsolicitedHandler, TcpDialer,
};
pub use server::{Listener, ServerConnection, ServerState};
