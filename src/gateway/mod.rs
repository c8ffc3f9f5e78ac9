//! Request/reply gateways.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `outbound` | Client façade: borrow, send, await reply, hand back |
//! | `inbound` | Server loop: read request, run handler, write reply |

// ============================================================================
// Submodules
// ============================================================================

/// Server-side gateway and handler trait.
pub mod inbound;

/// Client-side gateway.
pub mod outbound;

// ============================================================================
// Re-exports
// ============================================================================

pub use inbound::{FnHandler, Handler, InboundGateway, handler_fn};
pub use outbound::OutboundGateway;
