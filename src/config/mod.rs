//! Configuration for the client and server sides.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `options` | Runtime option structs consumed by pools, gateways, listeners |
//! | `settings` | Serializable deployment settings loaded from JSON or env |

// ============================================================================
// Submodules
// ============================================================================

/// Runtime option structs.
pub mod options;

/// Deployment settings.
pub mod settings;

// ============================================================================
// Re-exports
// ============================================================================

pub use options::{AcquirePolicy, GatewayOptions, PoolOptions, ServerOptions};
pub use settings::{ClientConfig, ServerConfig};
