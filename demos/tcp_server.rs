//! Sample TCP server.
//!
//! Answers every `MessageDto` with a greeting from `tcp-server`.
//!
//! Configured through the environment (`TCP_SERVER_BIND_HOST`,
//! `TCP_SERVER_PORT`, ...).
//!
//! Usage:
//!   cargo run --example tcp_server
//!   cargo run --example tcp_server -- --debug
//!   TCP_SERVER_PORT=9100 cargo run --example tcp_server

mod common;

// ============================================================================
// Imports
// ============================================================================

use bytes::Bytes;
use common::Args;
use tcp_gateway::{BoxError, InboundGateway, Listener, MessageDto, Result, ServerConfig, handler_fn};
use tracing::info;

// ============================================================================
// Constants
// ============================================================================

const SENDER: &str = "tcp-server";
const GREETING: &str = "Hello this message from TCP server!";

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== TCP Server ===\n");

    let config = ServerConfig::from_env()?;
    let gateway = InboundGateway::new(handler_fn(greet), config.server_options())?;
    let listener = Listener::bind(config.bind_addr(), gateway).await?;

    println!("[Listen] {}", listener.local_addr());
    println!("        ✓ Accepting connections\n");

    common::wait_for_exit(args.no_wait).await;

    listener.shutdown().await;
    println!("\n=== Done ===");
    Ok(())
}

// ============================================================================
// Handler
// ============================================================================

async fn greet(request: Bytes) -> std::result::Result<Bytes, BoxError> {
    let message = MessageDto::from_payload(&request)?;
    info!(sender = %message.sender, message = %message.message, "Message received");

    let reply = MessageDto::new(GREETING, SENDER);
    Ok(reply.to_payload()?)
}
