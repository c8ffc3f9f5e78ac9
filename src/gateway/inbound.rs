//! Server-side request/reply gateway.
//!
//! The [`InboundGateway`] drives one [`ServerConnection`]: it reads a
//! request, hands it to the application [`Handler`], and writes the result
//! back before reading the next request.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::config::ServerOptions;
use crate::error::{BoxError, Error, Result};
use crate::transport::ServerConnection;

// ============================================================================
// Handler
// ============================================================================

/// Application logic invoked once per inbound request.
///
/// Called concurrently from every connection the listener is serving.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Turns a request payload into a reply payload.
    async fn handle(&self, request: Bytes) -> std::result::Result<Bytes, BoxError>;
}

#[async_trait]
impl<H> Handler for Arc<H>
where
    H: Handler + ?Sized,
{
    async fn handle(&self, request: Bytes) -> std::result::Result<Bytes, BoxError> {
        (**self).handle(request).await
    }
}

/// [`Handler`] backed by an async closure. Built by [`handler_fn`].
#[derive(Clone)]
pub struct FnHandler<F> {
    f: F,
}

/// Adapts an async closure into a [`Handler`].
///
/// ```ignore
/// let upper = handler_fn(|request: Bytes| async move {
///     Ok(Bytes::from(request.to_ascii_uppercase()))
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Bytes, BoxError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Bytes, BoxError>> + Send + 'static,
{
    async fn handle(&self, request: Bytes) -> std::result::Result<Bytes, BoxError> {
        (self.f)(request).await
    }
}

// ============================================================================
// InboundGateway
// ============================================================================

/// Runs the read → handle → reply loop for accepted connections.
///
/// Cloning is cheap; clones share the handler.
#[derive(Clone)]
pub struct InboundGateway {
    handler: Arc<dyn Handler>,
    options: ServerOptions,
}

impl InboundGateway {
    /// Creates a gateway around `handler`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `options` are invalid.
    pub fn new(handler: impl Handler, options: ServerOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            handler: Arc::new(handler),
            options,
        })
    }

    /// Returns the server options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Runs the handler on one request, bounded by the handler timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::Handler`] if the handler returned an error
    /// - [`Error::Timeout`] if it ran past `handler_timeout`
    pub async fn handle_request(&self, request: Bytes) -> Result<Bytes> {
        let limit = self.options.handler_timeout;
        match timeout(limit, self.handler.handle(request)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(Error::handler(e)),
            Err(_) => Err(Error::timeout("handler", limit.as_millis() as u64)),
        }
    }

    /// Serves `connection` until EOF, an error, or `shutdown` turns `true`.
    ///
    /// Shutdown is observed between exchanges and while a reply is being
    /// written, never while a handler runs. Each reply write is bounded by
    /// `write_timeout`. A failing handler closes only this connection; when
    /// `error_replies` is set, the error text is written back first on a
    /// best-effort basis.
    pub async fn serve(&self, mut connection: ServerConnection, mut shutdown: watch::Receiver<bool>) {
        let id = connection.id();
        let peer = connection.peer();
        let mut served: u64 = 0;

        debug!(conn = %id, peer = %peer, "Serving connection");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let request = tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    debug!(conn = %id, "Shutdown requested");
                    break;
                }

                request = connection.next_request() => request,
            };

            let request = match request {
                Ok(Some(request)) => request,
                Ok(None) => break,
                Err(e) => {
                    warn!(conn = %id, error = %e, "Read failed, closing connection");
                    break;
                }
            };

            match self.handle_request(request).await {
                Ok(reply) => {
                    if let Err(e) = self.write_reply(&mut connection, reply, &mut shutdown).await {
                        warn!(conn = %id, error = %e, "Reply failed, closing connection");
                        break;
                    }
                    served += 1;
                }
                Err(e) => {
                    warn!(conn = %id, error = %e, "Handler failed, closing connection");
                    if self.options.error_replies
                        && let Err(write_err) = self
                            .write_reply(&mut connection, Bytes::from(e.to_string()), &mut shutdown)
                            .await
                    {
                        trace!(conn = %id, error = %write_err, "Error reply not delivered");
                    }
                    break;
                }
            }
        }

        connection.close().await;
        debug!(conn = %id, served, "Connection closed");
    }

    /// Writes one reply, giving up on `write_timeout` or shutdown.
    async fn write_reply(
        &self,
        connection: &mut ServerConnection,
        reply: Bytes,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let id = connection.id();
        let limit = self.options.write_timeout;

        tokio::select! {
            written = timeout(limit, connection.reply(reply)) => match written {
                Ok(result) => result,
                Err(_) => Err(Error::timeout("reply write", limit.as_millis() as u64)),
            },

            _ = shutdown.changed() => {
                debug!(conn = %id, "Shutdown requested during reply");
                Err(Error::ConnectionClosed)
            }
        }
    }
}

impl std::fmt::Debug for InboundGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundGateway")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
