//! Client-side request/reply façade.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::GatewayOptions;
use crate::error::Result;
use crate::transport::ConnectionPool;

// ============================================================================
// OutboundGateway
// ============================================================================

/// Sends one payload and waits for its reply over a pooled connection.
///
/// Each call borrows a connection, performs exactly one exchange, and hands
/// the connection back: released after a reply, discarded after any error.
/// Failures are returned as-is; retrying is left to the caller.
///
/// A server with `error_replies` enabled answers a failed handler with the
/// error text as an ordinary frame and then hangs up. That frame comes back
/// from [`OutboundGateway::send`] as `Ok`, so callers talking to such a
/// server need a payload format that marks errors.
///
/// # Example
///
/// ```ignore
/// let pool = Arc::new(ConnectionPool::connect(endpoint, PoolOptions::new())?);
/// let gateway = OutboundGateway::new(pool, GatewayOptions::new())?;
///
/// let reply = gateway.send("hello").await?;
/// ```
#[derive(Clone)]
pub struct OutboundGateway {
    pool: Arc<ConnectionPool>,
    options: GatewayOptions,
}

impl OutboundGateway {
    /// Creates a gateway over `pool`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if `options` are invalid.
    pub fn new(pool: Arc<ConnectionPool>, options: GatewayOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { pool, options })
    }

    /// Returns the underlying pool.
    #[inline]
    #[must_use]
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Returns the gateway options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    /// Sends `payload` and returns the reply, bounded by the request timeout.
    ///
    /// # Errors
    ///
    /// See [`OutboundGateway::send_with_deadline`].
    pub async fn send(&self, payload: impl Into<Bytes>) -> Result<Bytes> {
        self.send_with_deadline(payload, Instant::now() + self.options.request_timeout)
            .await
    }

    /// Sends `payload` and returns the reply.
    ///
    /// `deadline` bounds both the wait for a pooled connection and the wait
    /// for the reply.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::Timeout`] if `deadline` passes
    /// - [`crate::Error::PoolExhausted`] at capacity under fail-fast
    /// - [`crate::Error::Connect`] if a new connection cannot be opened
    /// - [`crate::Error::ConnectionClosed`] if the peer closed mid-exchange
    /// - [`crate::Error::FrameTooLarge`] / [`crate::Error::Protocol`] on framing violations
    pub async fn send_with_deadline(
        &self,
        payload: impl Into<Bytes>,
        deadline: Instant,
    ) -> Result<Bytes> {
        let mut connection = self.pool.acquire(deadline).await?;
        let id = connection.id();

        match connection.send(payload, deadline).await {
            Ok(reply) => {
                trace!(conn = %id, size = reply.len(), "Exchange completed");
                connection.release();
                Ok(reply)
            }
            Err(e) => {
                debug!(conn = %id, error = %e, "Exchange failed, discarding connection");
                connection.discard();
                Err(e)
            }
        }
    }

    /// Sends `request` as JSON and decodes the JSON reply.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Json`] if encoding or decoding fails, plus everything
    /// [`OutboundGateway::send`] returns.
    pub async fn send_json<T, R>(&self, request: &T) -> Result<R>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let payload = serde_json::to_vec(request)?;
        let reply = self.send(payload).await?;
        Ok(serde_json::from_slice(&reply)?)
    }
}

impl std::fmt::Debug for OutboundGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundGateway")
            .field("endpoint", self.pool.endpoint())
            .field("options", &self.options)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
